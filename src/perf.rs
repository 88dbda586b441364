//! k6 load-test launcher.
//!
//! The script reads its target and budgets from the environment, so the harness only has to
//! translate [`Settings`] into variables and hand over to `k6 run`.

use crate::config::Settings;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;

/// Default load-test script.
pub const DEFAULT_SCRIPT: &str = "k6/script.js";

const K6_PROGRAM: &str = "k6";

/// Errors raised while running the load test.
#[derive(Debug, Error)]
pub enum PerfError {
    /// The script path does not exist.
    #[error("k6 script not found: {0}")]
    MissingScript(PathBuf),
    /// The k6 binary could not be started.
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// k6 exited unsuccessfully, usually because a threshold was crossed.
    #[error("k6 run failed with {0}")]
    Failed(ExitStatus),
}

/// Environment variables consumed by the k6 script.
pub fn k6_env(settings: &Settings) -> Vec<(&'static str, String)> {
    vec![
        ("API_BASE_URL", settings.base_url.clone()),
        ("RAG_API_TOKEN", settings.token.clone()),
        ("K6_VUS", settings.k6_vus.to_string()),
        ("K6_P95_MS", settings.k6_p95_ms.to_string()),
    ]
}

/// Run `k6 run <script>` with the settings-derived environment.
///
/// k6 output is inherited so its live summary reaches the terminal.
pub async fn run_k6(settings: &Settings, script: &Path) -> Result<ExitStatus, PerfError> {
    launch(K6_PROGRAM, script, k6_env(settings)).await
}

async fn launch(
    program: &str,
    script: &Path,
    env: Vec<(&'static str, String)>,
) -> Result<ExitStatus, PerfError> {
    if !script.exists() {
        return Err(PerfError::MissingScript(script.to_path_buf()));
    }

    tracing::info!(program, script = %script.display(), "Starting load test");
    let status = Command::new(program)
        .arg("run")
        .arg(script)
        .envs(env)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|source| PerfError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !status.success() {
        tracing::error!(%status, "Load test failed");
        return Err(PerfError::Failed(status));
    }
    tracing::info!("Load test passed");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_carries_target_and_budgets() {
        let mut settings = Settings::for_tests("http://localhost:8000");
        settings.token = "secret".into();

        let env = k6_env(&settings);
        assert_eq!(
            env,
            vec![
                ("API_BASE_URL", "http://localhost:8000".to_string()),
                ("RAG_API_TOKEN", "secret".to_string()),
                ("K6_VUS", "10".to_string()),
                ("K6_P95_MS", "1200".to_string()),
            ]
        );
    }

    #[test]
    fn bundled_script_seeds_before_load() {
        let script = include_str!("../k6/script.js");
        assert!(script.contains("export function setup()"));
        assert!(script.contains("`${BASE}/ingest`"));

        let docs = crate::datasets::load_seed_docs(Path::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/data/seed_docs.json"
        )))
        .expect("seed docs");
        for doc in docs {
            assert!(script.contains(&format!("\"{}\"", doc.id)), "missing {}", doc.id);
        }
    }

    #[tokio::test]
    async fn missing_script_is_reported_before_launch() {
        let settings = Settings::for_tests("http://localhost:8000");
        let err = run_k6(&settings, Path::new("does/not/exist.js"))
            .await
            .expect_err("missing script");
        assert!(matches!(err, PerfError::MissingScript(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_outcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("script.js");
        std::fs::write(&script, "export default function () {}").expect("write script");

        launch("true", &script, Vec::new()).await.expect("passes");
        let err = launch("false", &script, Vec::new())
            .await
            .expect_err("fails");
        assert!(matches!(err, PerfError::Failed(_)));
    }
}
