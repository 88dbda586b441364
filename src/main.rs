use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ragprobe::client::{Document, RagClient};
use ragprobe::config::{self, Settings};
use ragprobe::eval::{self, CommandScorer, DEFAULT_METRICS, EvalRun};
use ragprobe::polling::{PollOptions, TokioSleeper, verify};
use ragprobe::{contract, datasets, functional, logging, perf};

#[derive(Parser)]
#[command(
    name = "ragprobe",
    version,
    about = "Quality-assurance harness for RAG HTTP services"
)]
struct Cli {
    /// Directory holding base.yaml and the environment overlays.
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,
    /// Environment overlay to apply; defaults to "dev".
    #[arg(long, global = true, env = "ENV")]
    env: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest the seed corpus.
    Seed {
        #[arg(long, default_value = datasets::DEFAULT_SEED_DOCS)]
        docs: PathBuf,
    },
    /// Poll until a question's answer or contexts mention the expected text.
    Verify {
        #[arg(long)]
        question: String,
        #[arg(long)]
        expect: String,
        /// Ingest a document with this id before polling (requires --text).
        #[arg(long, requires = "text")]
        doc_id: Option<String>,
        #[arg(long, requires = "doc_id")]
        text: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        interval_s: Option<f64>,
    },
    /// Seed the corpus and run the functional suite.
    Functional {
        #[arg(long, default_value = datasets::DEFAULT_SEED_DOCS)]
        docs: PathBuf,
        /// Run the checks against whatever the service already holds.
        #[arg(long)]
        skip_seed: bool,
    },
    /// Validate the published OpenAPI document.
    Contract,
    /// Evaluate the gold set and enforce metric thresholds.
    Eval {
        #[arg(long, default_value = datasets::DEFAULT_GOLD)]
        gold: PathBuf,
        #[arg(long, default_value = eval::DEFAULT_REPORT_PATH)]
        out: PathBuf,
    },
    /// Run the k6 load test.
    Perf {
        #[arg(long, default_value = perf::DEFAULT_SCRIPT)]
        script: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init_tracing();
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::init_settings(&cli.config_dir, cli.env.as_deref())
        .with_context(|| format!("failed to load settings from {}", cli.config_dir.display()))?;
    let client = RagClient::new(settings).context("failed to build HTTP client")?;

    match cli.command {
        Command::Seed { docs } => seed(&client, &docs).await,
        Command::Verify {
            question,
            expect,
            doc_id,
            text,
            max_attempts,
            interval_s,
        } => {
            if let (Some(id), Some(text)) = (doc_id, text) {
                functional::seed(&client, &[Document::new(id, text)]).await?;
            }
            let options = poll_options(settings, max_attempts, interval_s)?;
            let outcome = verify(&client, &TokioSleeper, &question, &expect, &options).await?;
            let attempts = outcome.attempts();
            let result = outcome.into_result(&question, &expect)?;
            println!("PASS '{expect}' found after {attempts} attempt(s): {}", result.answer);
            Ok(())
        }
        Command::Functional { docs, skip_seed } => {
            if skip_seed {
                tracing::info!("Seeding skipped on request");
            } else {
                seed(&client, &docs).await?;
            }
            let report = functional::run_suite(
                &client,
                &TokioSleeper,
                &PollOptions::from_settings(settings),
            )
            .await;
            for check in &report.checks {
                println!("{check}");
            }
            if !report.passed() {
                bail!("{} functional check(s) failed", report.failures().count());
            }
            Ok(())
        }
        Command::Contract => {
            let summary = contract::check_openapi(&client).await?;
            println!(
                "PASS openapi {} ({} paths){}",
                summary.version,
                summary.path_count,
                summary
                    .title
                    .map(|title| format!(": {title}"))
                    .unwrap_or_default()
            );
            Ok(())
        }
        Command::Eval { gold, out } => evaluate(settings, &client, &gold, &out).await,
        Command::Perf { script } => {
            perf::run_k6(settings, &script).await?;
            Ok(())
        }
    }
}

async fn seed(client: &RagClient, path: &Path) -> Result<()> {
    let docs = datasets::load_seed_docs(path)
        .with_context(|| format!("failed to load seed documents from {}", path.display()))?;
    let response = functional::seed(client, &docs)
        .await
        .context("failed to seed the service")?;
    println!("Seeded {} document(s): {}", docs.len(), response.status);
    Ok(())
}

async fn evaluate(
    settings: &Settings,
    client: &RagClient,
    gold: &Path,
    out: &Path,
) -> Result<()> {
    eval::ensure_scorer_credentials()?;
    let scorer = CommandScorer::from_command(&settings.scorer_command)?;
    let records = datasets::load_gold(gold)?;
    let report = eval::run_evaluation(
        client,
        &scorer,
        EvalRun {
            gold: &records,
            thresholds: &settings.ragas_thresholds,
            metrics: &DEFAULT_METRICS,
            out,
            env: &settings.env,
        },
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(())
}

fn poll_options(
    settings: &Settings,
    max_attempts: Option<u32>,
    interval_s: Option<f64>,
) -> Result<PollOptions> {
    let defaults = PollOptions::from_settings(settings);
    let interval = match interval_s {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid --interval-s {secs}"))?,
        None => defaults.interval,
    };
    Ok(PollOptions::new(
        max_attempts.unwrap_or(defaults.max_attempts),
        interval,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn settings() -> Settings {
        Settings {
            env: "test".into(),
            base_url: "http://127.0.0.1:9".into(),
            token: String::new(),
            timeout: Duration::from_secs(1),
            openapi_path: "/openapi.json".into(),
            ingest_path: "/ingest".into(),
            query_path: "/query".into(),
            k6_vus: 1,
            k6_p95_ms: 1200,
            ragas_thresholds: BTreeMap::new(),
            verify_max_attempts: 2,
            verify_interval: Duration::ZERO,
            scorer_command: Vec::new(),
        }
    }

    #[test]
    fn env_flag_is_global() {
        let cli = Cli::try_parse_from(["ragprobe", "contract", "--env", "ci"]).expect("parse");
        assert_eq!(cli.env.as_deref(), Some("ci"));
        assert!(matches!(cli.command, Command::Contract));
    }

    #[test]
    fn functional_seeds_by_default() {
        let cli = Cli::try_parse_from(["ragprobe", "functional"]).expect("parse");
        match cli.command {
            Command::Functional { docs, skip_seed } => {
                assert!(!skip_seed);
                assert_eq!(docs, PathBuf::from(datasets::DEFAULT_SEED_DOCS));
            }
            _ => panic!("expected functional"),
        }
        let cli = Cli::try_parse_from(["ragprobe", "functional", "--skip-seed"]).expect("parse");
        assert!(matches!(cli.command, Command::Functional { skip_seed: true, .. }));
    }

    #[test]
    fn verify_requires_text_with_doc_id() {
        let parsed = Cli::try_parse_from([
            "ragprobe", "verify", "--question", "q", "--expect", "e", "--doc-id", "d",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn missing_seed_file_aborts() {
        let client = RagClient::new(&settings()).expect("client");
        let err = seed(&client, Path::new("does/not/exist.json"))
            .await
            .expect_err("missing seed file");
        assert!(format!("{err:#}").contains("failed to load seed documents from does/not/exist.json"));
    }

    #[test]
    fn interval_override_is_validated() {
        let options = poll_options(&settings(), Some(5), Some(0.5)).expect("options");
        assert_eq!(options, PollOptions::new(5, Duration::from_millis(500)));
        assert!(poll_options(&settings(), None, Some(-1.0)).is_err());
        assert_eq!(
            poll_options(&settings(), None, None).expect("defaults"),
            PollOptions::new(2, Duration::ZERO)
        );
    }
}
