use std::path::Path;

use anyhow::{Context, Result};
use faultline_core::{Config, FaultMode, Investigation, Investigator, RunRequest};

/// Returns whether a snapshot was captured
pub async fn execute(
    config_path: Option<&Path>,
    test: &str,
    mode: FaultMode,
    with_diagnosis: bool,
    patch_out: Option<&Path>,
) -> Result<bool> {
    let config = Config::discover(config_path).context("Failed to load configuration")?;
    let mut investigator = Investigator::from_config(config, with_diagnosis)
        .context("Failed to set up investigation")?;

    let request = RunRequest::new(test, mode);
    let investigation = investigator
        .investigate(&request, patch_out)
        .await
        .with_context(|| format!("Investigation of {} failed", test))?;

    print_summary(&investigation);
    Ok(investigation.outcome.is_success())
}

fn print_summary(investigation: &Investigation) {
    let outcome = &investigation.outcome;
    println!("session   {}", outcome.session.id());
    if let Some(path) = &outcome.log_path {
        println!("log       {}", path.display());
    }

    match (outcome.snapshot(), outcome.failure()) {
        (Some(snapshot), _) => {
            println!();
            print!("{}", snapshot.render_report());
            println!();
            if let Some(path) = &investigation.snapshot_path {
                println!("snapshot  {}", path.display());
            }
            println!("fingerprint {}", snapshot.fingerprint());
            for run in &investigation.similar_runs {
                println!(
                    "  seen before in {} ({})",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        (None, Some(failure)) => {
            eprintln!("{}", failure);
            for line in &failure.transcript_tail {
                eprintln!("  | {}", line);
            }
        }
        (None, None) => {}
    }

    if let Some(artifact) = &investigation.patch {
        let diagnosis = &artifact.diagnosis;
        println!();
        println!("root cause  {}", diagnosis.root_cause);
        println!("function    {} ({})", diagnosis.faulty_function, diagnosis.faulty_line);
        println!("severity    {}", diagnosis.severity);
        if let Some(path) = &investigation.patch_path {
            println!("patch       {}", path.display());
        }
        if let Some(reason) = &investigation.diagnosis_error {
            eprintln!("warning: {}", reason);
        }
    } else if let Some(reason) = &investigation.diagnosis_error {
        eprintln!("no diagnosis: {}", reason);
    }
}
