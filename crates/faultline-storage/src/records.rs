//! Stored rows

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// One session as recorded after it finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub test_name: String,
    pub mode: String,
    /// Final session state (`done` or `error`)
    pub state: String,
    pub failed_stage: Option<String>,
    pub failure_kind: Option<String>,
    pub fingerprint: Option<String>,
    pub snapshot_json: Option<String>,
    pub transcript_tail: Vec<String>,
    pub error: Option<String>,
    pub log_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunRecord {
    pub(crate) const COLUMNS: &'static str = "id, test_name, mode, state, failed_stage, failure_kind, fingerprint, \
         snapshot_json, transcript_tail, error, log_path, started_at, finished_at";

    pub fn succeeded(&self) -> bool {
        self.snapshot_json.is_some()
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tail_json: String = row.get(8)?;
        let transcript_tail: Vec<String> = serde_json::from_str(&tail_json).unwrap_or_default();
        let started: String = row.get(11)?;
        let finished: String = row.get(12)?;

        Ok(Self {
            id: row.get(0)?,
            test_name: row.get(1)?,
            mode: row.get(2)?,
            state: row.get(3)?,
            failed_stage: row.get(4)?,
            failure_kind: row.get(5)?,
            fingerprint: row.get(6)?,
            snapshot_json: row.get(7)?,
            transcript_tail,
            error: row.get(9)?,
            log_path: row.get(10)?,
            started_at: parse_time(&started),
            finished_at: parse_time(&finished),
        })
    }
}

/// A diagnosis made for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    /// Assigned on insert
    pub id: Option<i64>,
    pub run_id: String,
    pub severity: String,
    pub root_cause: String,
    pub faulty_function: String,
    pub faulty_line: String,
    pub analysis_summary: String,
    pub patch: String,
    pub patch_valid: bool,
    pub created_at: DateTime<Utc>,
}

impl DiagnosisRecord {
    pub(crate) const COLUMNS: &'static str = "id, run_id, severity, root_cause, faulty_function, faulty_line, \
         analysis_summary, patch, patch_valid, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created: String = row.get(9)?;
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            severity: row.get(2)?,
            root_cause: row.get(3)?,
            faulty_function: row.get(4)?,
            faulty_line: row.get(5)?,
            analysis_summary: row.get(6)?,
            patch: row.get(7)?,
            patch_valid: row.get::<_, i32>(8)? != 0,
            created_at: parse_time(&created),
        })
    }
}

fn parse_time(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
