use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DbtConfig;

/// The subset of dbt's `run_results.json` artifact we report on.
#[derive(Debug, Deserialize)]
pub struct RunResults {
    pub results: Vec<ModelResult>,
    #[serde(default)]
    pub elapsed_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct ModelResult {
    pub unique_id: String,
    pub status: String,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Run the configured dbt project and log one line per materialized model.
///
/// A non-zero dbt exit or an unreadable artifact is fatal for this step; the
/// data already loaded stays where it is.
pub async fn run(cfg: &DbtConfig) -> Result<Vec<ModelResult>> {
    let mut cmd = Command::new("dbt");
    cmd.arg("run").arg("--project-dir").arg(&cfg.project_dir);
    if let Some(profiles_dir) = &cfg.profiles_dir {
        cmd.arg("--profiles-dir").arg(profiles_dir);
    }

    info!(project_dir = %cfg.project_dir.display(), "running dbt models");
    let output = cmd
        .output()
        .await
        .context("spawning dbt (is it installed and on PATH?)")?;
    debug!(stdout = %String::from_utf8_lossy(&output.stdout), "dbt output");

    if !output.status.success() {
        bail!(
            "dbt run exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let artifact = cfg.project_dir.join("target").join("run_results.json");
    let results = read_run_results(&artifact)?;
    for model in &results.results {
        info!(
            model = %model.unique_id,
            status = %model.status,
            time_s = model.execution_time,
            message = model.message.as_deref().unwrap_or(""),
            "model materialized"
        );
    }
    Ok(results.results)
}

/// Parse a `run_results.json` artifact.
pub fn read_run_results(path: &Path) -> Result<RunResults> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading dbt artifact {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing dbt artifact {}", path.display()))
}
