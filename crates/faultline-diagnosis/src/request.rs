//! Diagnosis requests

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use faultline_snapshot::{CrashSnapshot, FaultMode};

const SYSTEM_PROMPT: &str = "You are an expert operating systems debugger, specializing in xv6 \
and C/Assembly. Analyze the provided machine state captured at the moment of a fault. Determine \
the root cause (e.g. NULL pointer dereference, stack overflow, bad memory access, invalid \
opcode). Provide your analysis, a suggested fix and an estimate of the severity.";

const INSTRUCTIONS: &str = "Based on this information:
1. Identify the EXACT function and line of code that caused the fault
2. Explain WHY this specific code caused the crash
3. Provide a SPECIFIC patch with the exact file name and line number
4. The patch must be in unified diff format";

/// One request to the diagnosis service, built from a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRequest {
    pub session_id: String,
    pub fingerprint: String,
    pub system_prompt: String,
    pub user_query: String,
}

impl DiagnosisRequest {
    pub fn from_snapshot(snapshot: &CrashSnapshot) -> Self {
        let mut provided = vec!["The backtrace showing the call stack".to_string()];
        if snapshot.registers().is_resolved() {
            provided.push(match snapshot.mode() {
                FaultMode::Kernel => {
                    "CPU register dump (including CR2 which shows the faulting address)".to_string()
                }
                FaultMode::User => "CPU register dump at the time the debugger halted".to_string(),
            });
        }
        if snapshot.faulting_address().is_resolved() {
            provided.push("The faulting address and where it was read from".to_string());
        }
        if !snapshot.return_addresses().is_empty() {
            provided.push("The saved return addresses showing where the bad call came from".to_string());
        }
        if snapshot.resolved().iter().any(|r| r.source.is_resolved()) {
            provided.push("Source code around the faulting and calling sites".to_string());
        }
        if snapshot.disassembly().is_resolved() {
            provided.push("Disassembly around the faulting instruction".to_string());
        }

        let trap = match snapshot.trap() {
            Some(trap) => trap.to_string(),
            None => "an unclassified fault".to_string(),
        };

        let mut query = format!(
            "Analyze the following xv6 {} fault state caused by {} while running `{}`.\n\n",
            snapshot.mode(),
            trap,
            snapshot.test_name()
        );
        query.push_str("You have been provided with:\n");
        for (i, item) in provided.iter().enumerate() {
            query.push_str(&format!("{}. {}\n", i + 1, item));
        }
        let missing = snapshot.missing_fields();
        if !missing.is_empty() {
            query.push_str(&format!("Not captured: {}\n", missing.join(", ")));
        }
        query.push('\n');
        query.push_str(INSTRUCTIONS);
        query.push_str("\n\n--- Captured Debug Data ---\n");
        query.push_str(&snapshot.render_report());

        Self {
            session_id: snapshot.session_id().to_string(),
            fingerprint: snapshot.fingerprint().to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_query: query,
        }
    }

    /// generateContent body with a structured response schema
    pub fn to_payload(&self) -> Value {
        let field = |description: &str| json!({ "type": "STRING", "description": description });
        json!({
            "contents": [{ "parts": [{ "text": self.user_query }] }],
            "systemInstruction": { "parts": [{ "text": self.system_prompt }] },
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "rootCause": field("The specific technical reason for the fault."),
                        "faultyFunction": field("The exact function name and file that contains the bug."),
                        "faultyLine": field("The specific line number or code snippet that caused the fault."),
                        "severity": field("High, Medium, or Low."),
                        "analysisSummary": field("A concise explanation of how the captured state points to the root cause."),
                        "suggestedFixPatch": field("A unified diff patch with file names and line numbers."),
                    },
                    "required": [
                        "rootCause",
                        "faultyFunction",
                        "faultyLine",
                        "severity",
                        "analysisSummary",
                        "suggestedFixPatch"
                    ]
                }
            }
        })
    }
}
