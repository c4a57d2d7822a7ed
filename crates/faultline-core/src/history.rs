//! Run history
//!
//! Maps session outcomes and diagnoses onto storage records.

use chrono::Utc;
use std::path::Path;

use faultline_diagnosis::PatchArtifact;
use faultline_session::SessionOutcome;
use faultline_storage::{Database, DiagnosisRecord, RunRecord};

use crate::Result;

/// Lines of transcript kept with a successful run
const SUCCESS_TAIL_LINES: usize = 20;

#[derive(Clone)]
pub struct RunHistory {
    db: Database,
}

impl RunHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn record_outcome(&self, outcome: &SessionOutcome) -> Result<RunRecord> {
        let session = &outcome.session;

        let (fingerprint, snapshot_json) = match outcome.snapshot() {
            Some(snapshot) => (
                Some(snapshot.fingerprint().to_string()),
                Some(snapshot.to_json()?),
            ),
            None => (None, None),
        };

        let (failed_stage, failure_kind, error, transcript_tail) = match outcome.failure() {
            Some(failure) => (
                Some(failure.stage.to_string()),
                Some(failure.kind.to_string()),
                Some(failure.to_string()),
                failure.transcript_tail.clone(),
            ),
            None => (
                None,
                None,
                None,
                outcome.transcript.tail(SUCCESS_TAIL_LINES),
            ),
        };

        let record = RunRecord {
            id: session.id().to_string(),
            test_name: session.test_name.clone(),
            mode: session.mode.to_string(),
            state: session.state().to_string(),
            failed_stage,
            failure_kind,
            fingerprint,
            snapshot_json,
            transcript_tail,
            error,
            log_path: outcome
                .log_path
                .as_ref()
                .map(|p| p.display().to_string()),
            started_at: session.created_at,
            finished_at: session.updated_at,
        };

        self.db.record_run(&record)?;
        tracing::debug!(run_id = %record.id, state = %record.state, "Run recorded");
        Ok(record)
    }

    pub fn record_diagnosis(&self, run_id: &str, artifact: &PatchArtifact) -> Result<i64> {
        let diagnosis = &artifact.diagnosis;
        let record = DiagnosisRecord {
            id: None,
            run_id: run_id.to_string(),
            severity: diagnosis.severity.to_string(),
            root_cause: diagnosis.root_cause.clone(),
            faulty_function: diagnosis.faulty_function.clone(),
            faulty_line: diagnosis.faulty_line.clone(),
            analysis_summary: diagnosis.analysis_summary.clone(),
            patch: diagnosis.suggested_fix_patch.clone(),
            patch_valid: artifact.is_valid(),
            created_at: Utc::now(),
        };
        Ok(self.db.record_diagnosis(&record)?)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        Ok(self.db.recent_runs(limit)?)
    }

    /// Earlier runs that crashed the same way, excluding `run_id`
    pub fn similar(&self, fingerprint: &str, run_id: &str) -> Result<Vec<RunRecord>> {
        let runs = self.db.runs_by_fingerprint(fingerprint)?;
        Ok(runs.into_iter().filter(|r| r.id != run_id).collect())
    }

    pub fn diagnoses(&self, run_id: &str) -> Result<Vec<DiagnosisRecord>> {
        Ok(self.db.diagnoses_for_run(run_id)?)
    }
}
