use std::path::Path;

use anyhow::{Context, Result};
use faultline_core::{Config, RunHistory};

pub fn execute(config_path: Option<&Path>, limit: usize) -> Result<()> {
    let config = Config::discover(config_path).context("Failed to load configuration")?;
    let history = RunHistory::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open run history at {}",
            config.database_path.display()
        )
    })?;

    let runs = history.recent(limit)?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    for run in runs {
        let result = match (&run.failed_stage, &run.failure_kind) {
            (Some(stage), Some(kind)) => format!("{} failed ({})", stage, kind),
            _ => run.state.clone(),
        };
        let fingerprint = run
            .fingerprint
            .as_deref()
            .map(|f| &f[..f.len().min(12)])
            .unwrap_or("-");
        println!(
            "{}  {}  {:<6} {:<16} {:<24} {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            &run.id[..run.id.len().min(8)],
            run.mode,
            run.test_name,
            result,
            fingerprint
        );

        for diagnosis in history.diagnoses(&run.id)? {
            println!(
                "    {} {} at {}: {}",
                diagnosis.severity,
                diagnosis.faulty_function,
                diagnosis.faulty_line,
                diagnosis.root_cause
            );
        }
    }

    Ok(())
}
