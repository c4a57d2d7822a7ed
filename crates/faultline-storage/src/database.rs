//! Database connection and operations

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::error::StorageError;
use crate::migrations::run_migrations;
use crate::records::{DiagnosisRecord, RunRecord};
use crate::Result;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Enable foreign keys
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // WAL mode for better concurrent performance
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        run_migrations(&conn)?;
        tracing::debug!(path = %path.display(), "Database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Insert or replace a finished run
    pub fn record_run(&self, run: &RunRecord) -> Result<()> {
        let tail = serde_json::to_string(&run.transcript_tail)?;
        self.with_connection(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    RunRecord::COLUMNS
                ),
                rusqlite::params![
                    run.id,
                    run.test_name,
                    run.mode,
                    run.state,
                    run.failed_stage,
                    run.failure_kind,
                    run.fingerprint,
                    run.snapshot_json,
                    tail,
                    run.error,
                    run.log_path,
                    run.started_at.to_rfc3339(),
                    run.finished_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(run_id = %run.id, state = %run.state, "Run recorded");
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        self.with_connection(|conn| {
            let run = conn
                .query_row(
                    &format!("SELECT {} FROM runs WHERE id = ?1", RunRecord::COLUMNS),
                    [id],
                    RunRecord::from_row,
                )
                .optional()?;
            Ok(run)
        })
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.query_runs(
            &format!(
                "SELECT {} FROM runs ORDER BY started_at DESC LIMIT ?1",
                RunRecord::COLUMNS
            ),
            rusqlite::params![limit as i64],
        )
    }

    /// Every run that crashed the same way, most recent first
    pub fn runs_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<RunRecord>> {
        self.query_runs(
            &format!(
                "SELECT {} FROM runs WHERE fingerprint = ?1 ORDER BY started_at DESC",
                RunRecord::COLUMNS
            ),
            rusqlite::params![fingerprint],
        )
    }

    fn query_runs(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<RunRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let runs = stmt
                .query_map(params, RunRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(runs)
        })
    }

    /// Returns the new diagnosis id
    pub fn record_diagnosis(&self, diagnosis: &DiagnosisRecord) -> Result<i64> {
        self.transaction(|conn| {
            let exists: Option<String> = conn
                .query_row("SELECT id FROM runs WHERE id = ?1", [&diagnosis.run_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StorageError::RunNotFound(diagnosis.run_id.clone()));
            }

            conn.execute(
                "INSERT INTO diagnoses (run_id, severity, root_cause, faulty_function, faulty_line, \
                 analysis_summary, patch, patch_valid, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    diagnosis.run_id,
                    diagnosis.severity,
                    diagnosis.root_cause,
                    diagnosis.faulty_function,
                    diagnosis.faulty_line,
                    diagnosis.analysis_summary,
                    diagnosis.patch,
                    diagnosis.patch_valid as i32,
                    diagnosis.created_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn diagnoses_for_run(&self, run_id: &str) -> Result<Vec<DiagnosisRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM diagnoses WHERE run_id = ?1 ORDER BY id",
                DiagnosisRecord::COLUMNS
            ))?;
            let diagnoses = stmt
                .query_map([run_id], DiagnosisRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(diagnoses)
        })
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn run(id: &str, fingerprint: Option<&str>, minutes_ago: i64) -> RunRecord {
        let started_at = Utc::now() - Duration::minutes(minutes_ago);
        RunRecord {
            id: id.to_string(),
            test_name: "trap_test".to_string(),
            mode: "kernel".to_string(),
            state: if fingerprint.is_some() { "done" } else { "error" }.to_string(),
            failed_stage: fingerprint.is_none().then(|| "arm".to_string()),
            failure_kind: fingerprint.is_none().then(|| "timeout".to_string()),
            fingerprint: fingerprint.map(str::to_string),
            snapshot_json: fingerprint.map(|_| "{}".to_string()),
            transcript_tail: vec!["[gdb] (gdb) break vectors.S:56".to_string()],
            error: fingerprint.is_none().then(|| "gdb: timed out".to_string()),
            log_path: None,
            started_at,
            finished_at: started_at + Duration::seconds(12),
        }
    }

    fn diagnosis(run_id: &str) -> DiagnosisRecord {
        DiagnosisRecord {
            id: None,
            run_id: run_id.to_string(),
            severity: "High".to_string(),
            root_cause: "NULL pointer dereference".to_string(),
            faulty_function: "main".to_string(),
            faulty_line: "trap_test.c:11".to_string(),
            analysis_summary: "cr2 is 0".to_string(),
            patch: "--- a/trap_test.c\n+++ b/trap_test.c\n@@ -11 +11 @@\n".to_string(),
            patch_valid: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_connection(|conn| {
            let count: i32 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/faultline.db");
        let db = Database::open(&path).unwrap();
        db.record_run(&run("r1", Some("abc"), 0)).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        assert!(reopened.get_run("r1").unwrap().is_some());
    }

    #[test]
    fn test_run_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let failed = run("r1", None, 5);
        db.record_run(&failed).unwrap();

        let loaded = db.get_run("r1").unwrap().unwrap();
        assert_eq!(loaded.failed_stage.as_deref(), Some("arm"));
        assert_eq!(loaded.transcript_tail, failed.transcript_tail);
        assert_eq!(loaded.started_at.timestamp(), failed.started_at.timestamp());
        assert!(!loaded.succeeded());
        assert!(db.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_recent_and_fingerprint_queries() {
        let db = Database::open_in_memory().unwrap();
        db.record_run(&run("old", Some("abc"), 30)).unwrap();
        db.record_run(&run("other", Some("def"), 20)).unwrap();
        db.record_run(&run("new", Some("abc"), 10)).unwrap();
        db.record_run(&run("failed", None, 1)).unwrap();

        let recent: Vec<String> = db.recent_runs(3).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(recent, vec!["failed", "new", "other"]);

        let same: Vec<String> = db
            .runs_by_fingerprint("abc")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(same, vec!["new", "old"]);
    }

    #[test]
    fn test_diagnoses() {
        let db = Database::open_in_memory().unwrap();
        db.record_run(&run("r1", Some("abc"), 0)).unwrap();

        let first = db.record_diagnosis(&diagnosis("r1")).unwrap();
        let second = db.record_diagnosis(&diagnosis("r1")).unwrap();
        assert!(second > first);

        let stored = db.diagnoses_for_run("r1").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, Some(first));
        assert!(stored[0].patch_valid);

        assert!(matches!(
            db.record_diagnosis(&diagnosis("nope")),
            Err(StorageError::RunNotFound(_))
        ));
    }
}
