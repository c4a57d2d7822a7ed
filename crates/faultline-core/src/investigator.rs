//! Investigation pipeline
//!
//! One call reproduces a crash, records it, and asks for a diagnosis.

use std::path::{Path, PathBuf};

use faultline_diagnosis::{
    DiagnosisError, DiagnosisRequest, DiagnosisService, GeminiClient, PatchArtifact,
};
use faultline_session::{RunRequest, SessionOutcome, SessionRunner};
use faultline_snapshot::CrashSnapshot;
use faultline_storage::RunRecord;
use faultline_supervisor::{Builder, CommandBuilder, OsSpawner, ProcessSupervisor, Spawner};

use crate::config::Config;
use crate::history::RunHistory;
use crate::Result;

const DEFAULT_PATCH_FILE: &str = "suggested_fix.patch";

/// Everything one investigation produced
pub struct Investigation {
    pub outcome: SessionOutcome,
    pub run: RunRecord,
    pub snapshot_path: Option<PathBuf>,
    /// Earlier runs with the same fingerprint
    pub similar_runs: Vec<RunRecord>,
    pub patch: Option<PatchArtifact>,
    pub patch_path: Option<PathBuf>,
    /// Why no diagnosis was produced for a captured snapshot
    pub diagnosis_error: Option<String>,
}

impl Investigation {
    pub fn snapshot(&self) -> Option<&CrashSnapshot> {
        self.outcome.snapshot()
    }
}

pub struct Investigator<S: Spawner, B: Builder, D: DiagnosisService> {
    supervisor: ProcessSupervisor<S, B>,
    runner: SessionRunner,
    history: RunHistory,
    diagnosis: Option<D>,
    diagnosis_unavailable: Option<String>,
}

impl Investigator<OsSpawner, CommandBuilder, GeminiClient> {
    /// Real processes, the configured build command and the HTTP diagnosis
    /// client. A missing API key only disables diagnosis.
    pub fn from_config(config: Config, with_diagnosis: bool) -> Result<Self> {
        let history = RunHistory::open(&config.database_path)?;
        let supervisor = ProcessSupervisor::new(config.supervisor.clone());
        let runner = SessionRunner::new(config.session.clone());

        let mut investigator = Self::with_parts(supervisor, runner, history, None);

        if !with_diagnosis || !config.diagnosis.enabled {
            investigator.diagnosis_unavailable = Some("diagnosis disabled".to_string());
            return Ok(investigator);
        }

        match GeminiClient::from_config(config.diagnosis.clone()) {
            Ok(client) => investigator.diagnosis = Some(client),
            Err(e @ DiagnosisError::MissingApiKey { .. }) => {
                tracing::warn!(error = %e, "Diagnosis unavailable");
                investigator.diagnosis_unavailable = Some(e.to_string());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(investigator)
    }
}

impl<S: Spawner, B: Builder, D: DiagnosisService> Investigator<S, B, D> {
    pub fn with_parts(
        supervisor: ProcessSupervisor<S, B>,
        runner: SessionRunner,
        history: RunHistory,
        diagnosis: Option<D>,
    ) -> Self {
        Self {
            supervisor,
            runner,
            history,
            diagnosis,
            diagnosis_unavailable: None,
        }
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn supervisor(&self) -> &ProcessSupervisor<S, B> {
        &self.supervisor
    }

    /// Run one session, record it, save the snapshot and request a
    /// diagnosis. A failed session or diagnosis is reported in the
    /// investigation; only history and file errors are returned.
    pub async fn investigate(
        &mut self,
        request: &RunRequest,
        patch_out: Option<&Path>,
    ) -> Result<Investigation> {
        let outcome = self.runner.run(&mut self.supervisor, request).await;
        let run = self.history.record_outcome(&outcome)?;

        let mut investigation = Investigation {
            outcome,
            run,
            snapshot_path: None,
            similar_runs: Vec::new(),
            patch: None,
            patch_path: None,
            diagnosis_error: None,
        };

        let Some(snapshot) = investigation.outcome.snapshot() else {
            return Ok(investigation);
        };

        let work_dir = investigation.outcome.session.work_dir.clone();
        std::fs::create_dir_all(&work_dir)?;
        let snapshot_path = work_dir.join(format!("faultline-{}.json", snapshot.session_id()));
        std::fs::write(&snapshot_path, snapshot.to_json()?)?;
        tracing::info!(path = %snapshot_path.display(), "Snapshot saved");

        investigation.similar_runs = self
            .history
            .similar(snapshot.fingerprint(), snapshot.session_id())?;
        if !investigation.similar_runs.is_empty() {
            tracing::info!(
                fingerprint = %snapshot.fingerprint(),
                earlier = investigation.similar_runs.len(),
                "Crash seen before"
            );
        }

        match &self.diagnosis {
            None => {
                investigation.diagnosis_error = self.diagnosis_unavailable.clone();
            }
            Some(service) => {
                let diagnosis_request = DiagnosisRequest::from_snapshot(snapshot);
                match service.diagnose(&diagnosis_request).await {
                    Ok(result) => {
                        let artifact = PatchArtifact::new(result);
                        self.history
                            .record_diagnosis(snapshot.session_id(), &artifact)?;

                        match artifact.rejection() {
                            None => {
                                let patch_path = patch_out
                                    .map(Path::to_path_buf)
                                    .unwrap_or_else(|| work_dir.join(DEFAULT_PATCH_FILE));
                                artifact.write_to(&patch_path)?;
                                tracing::info!(
                                    severity = %artifact.diagnosis.severity,
                                    function = %artifact.diagnosis.faulty_function,
                                    path = %patch_path.display(),
                                    "Diagnosis written"
                                );
                                investigation.patch_path = Some(patch_path);
                            }
                            Some(e) => {
                                tracing::warn!(
                                    severity = %artifact.diagnosis.severity,
                                    error = %e,
                                    "Suggested patch rejected, not written"
                                );
                                investigation.diagnosis_error =
                                    Some(format!("suggested patch rejected: {}", e));
                            }
                        }
                        investigation.patch = Some(artifact);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Diagnosis failed");
                        investigation.diagnosis_error = Some(e.to_string());
                    }
                }
            }
        }

        investigation.snapshot_path = Some(snapshot_path);
        Ok(investigation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_channel::scripted::{Script, INTERRUPT};
    use faultline_diagnosis::{DiagnosisResult, Severity};
    use faultline_session::SessionSettings;
    use faultline_snapshot::FaultMode;
    use faultline_storage::Database;
    use faultline_supervisor::scripted::ScriptedSpawner;
    use faultline_supervisor::{NoBuild, ProcessRole, SupervisorConfig};
    use std::net::TcpListener;

    const PATCH: &str = "```diff\n--- a/user/div_zero.c\n+++ b/user/div_zero.c\n@@ -8,3 +8,4 @@\n int d = 0;\n+if (d == 0) exit();\n printf(1, \"%d\", 1 / d);\n```";

    struct Canned(std::result::Result<DiagnosisResult, String>);

    impl DiagnosisService for Canned {
        async fn diagnose(
            &self,
            request: &DiagnosisRequest,
        ) -> faultline_diagnosis::Result<DiagnosisResult> {
            assert!(request.user_query.contains("div_zero"));
            self.0.clone().map_err(DiagnosisError::Envelope)
        }
    }

    fn diagnosis() -> DiagnosisResult {
        DiagnosisResult {
            root_cause: "integer division by zero".to_string(),
            faulty_function: "main".to_string(),
            faulty_line: "user/div_zero.c:10".to_string(),
            severity: Severity::Medium,
            analysis_summary: "the divisor is never checked".to_string(),
            suggested_fix_patch: PATCH.to_string(),
        }
    }

    fn spawner() -> ScriptedSpawner {
        let gdb = Script::new()
            .greeting("GNU gdb (GDB) 14.2\n(gdb) ")
            .on("target remote", "Remote debugging using localhost:26000\n(gdb) ")
            .on("set ", "(gdb) ")
            .on(
                "break vectors.S:56",
                "Breakpoint 1 at 0xffffffff80106b0c: file vectors.S, line 56.\n(gdb) ",
            )
            .on("continue", "Continuing.\n")
            .on(
                INTERRUPT,
                "\nThread 1 received signal SIGINT, Interrupt.\n0xffffffff80103e5e in scheduler () at proc.c:310\n(gdb) ",
            )
            .on(
                "backtrace",
                "#0  0xffffffff80103e5e in scheduler () at proc.c:310\n#1  0xffffffff80102d1f in mpmain () at main.c:60\n(gdb) ",
            )
            .fallback("(gdb) ");
        let console = Script::new().greeting("init: starting sh\n$ ").on(
            "div_zero",
            "div_zero\npid 4 div_zero: trap 0 err 0 on cpu 1 rip 0x2a addr 0x0--kill proc\n$ ",
        );
        ScriptedSpawner::new()
            .with_script(ProcessRole::Debugger, gdb)
            .with_script(ProcessRole::Emulator, console)
    }

    fn investigator(
        dir: &Path,
        service: Option<Canned>,
    ) -> Investigator<ScriptedSpawner, NoBuild, Canned> {
        for image in ["kernel", "xv6.img", "fs.img"] {
            std::fs::write(dir.join(image), b"").unwrap();
        }
        let port = TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = SupervisorConfig {
            port,
            build_dir: dir.to_path_buf(),
            work_dir: dir.join("runs"),
            timeout_seconds: 1,
            teardown_grace_ms: 10,
            ..Default::default()
        };
        let settings = SessionSettings {
            boot_timeout_seconds: 2,
            fault_timeout_seconds: 2,
            ..Default::default()
        };
        Investigator::with_parts(
            ProcessSupervisor::with_parts(config, spawner(), NoBuild),
            SessionRunner::new(settings),
            RunHistory::new(Database::open_in_memory().unwrap()),
            service,
        )
    }

    #[tokio::test]
    async fn test_investigation_writes_patch() {
        let dir = tempfile::tempdir().unwrap();
        let mut investigator = investigator(dir.path(), Some(Canned(Ok(diagnosis()))));

        let request = RunRequest::new("div_zero", FaultMode::User);
        let investigation = investigator.investigate(&request, None).await.unwrap();

        let snapshot = investigation.snapshot().unwrap();
        assert_eq!(snapshot.trap().unwrap().number, 0);
        assert!(investigation.run.succeeded());
        assert!(investigation.diagnosis_error.is_none());

        let snapshot_path = investigation.snapshot_path.as_ref().unwrap();
        let saved = std::fs::read_to_string(snapshot_path).unwrap();
        assert_eq!(CrashSnapshot::from_json(&saved).unwrap().fingerprint(), snapshot.fingerprint());

        let patch_path = investigation.patch_path.as_ref().unwrap();
        assert_eq!(patch_path, &dir.path().join("runs").join("suggested_fix.patch"));
        let written = std::fs::read_to_string(patch_path).unwrap();
        assert!(written.contains("integer division by zero"));
        assert!(written.contains("+++ b/user/div_zero.c"));
        assert!(investigation.patch.as_ref().unwrap().is_valid());

        let diagnoses = investigator.history().diagnoses(&investigation.run.id).unwrap();
        assert_eq!(diagnoses.len(), 1);
        assert_eq!(diagnoses[0].severity, "Medium");
    }

    #[tokio::test]
    async fn test_invalid_patch_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let prose = DiagnosisResult {
            suggested_fix_patch: "Check the divisor before dividing.".to_string(),
            ..diagnosis()
        };
        let mut investigator = investigator(dir.path(), Some(Canned(Ok(prose))));

        let patch_out = dir.path().join("fix.patch");
        let request = RunRequest::new("div_zero", FaultMode::User);
        let investigation = investigator
            .investigate(&request, Some(&patch_out))
            .await
            .unwrap();

        assert!(!patch_out.exists());
        assert!(!dir.path().join("runs").join("suggested_fix.patch").exists());
        assert!(investigation.patch_path.is_none());
        assert!(!investigation.patch.as_ref().unwrap().is_valid());
        assert!(investigation
            .diagnosis_error
            .as_deref()
            .unwrap()
            .contains("no ---/+++ file headers"));

        let diagnoses = investigator.history().diagnoses(&investigation.run.id).unwrap();
        assert_eq!(diagnoses.len(), 1);
        assert!(!diagnoses[0].patch_valid);
    }

    #[tokio::test]
    async fn test_repeat_crash_finds_similar_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut investigator = investigator(dir.path(), None);
        let request = RunRequest::new("div_zero", FaultMode::User);

        let first = investigator.investigate(&request, None).await.unwrap();
        assert!(first.similar_runs.is_empty());
        assert!(first.patch.is_none());

        let second = investigator.investigate(&request, None).await.unwrap();
        assert_eq!(second.similar_runs.len(), 1);
        assert_eq!(second.similar_runs[0].id, first.run.id);
        assert_eq!(investigator.history().recent(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_diagnosis_failure_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let service = Canned(Err("blocked: SAFETY".to_string()));
        let mut investigator = investigator(dir.path(), Some(service));

        let patch_out = dir.path().join("fix.patch");
        let request = RunRequest::new("div_zero", FaultMode::User);
        let investigation = investigator
            .investigate(&request, Some(&patch_out))
            .await
            .unwrap();

        assert!(investigation.snapshot().is_some());
        assert!(investigation.snapshot_path.is_some());
        assert!(investigation.patch.is_none());
        assert!(investigation
            .diagnosis_error
            .as_deref()
            .unwrap()
            .contains("blocked: SAFETY"));
        assert!(!patch_out.exists());
    }
}
