//! quizroundd - scheduled quiz round daemon.
//!
//! Opens rounds at the configured daily slots and announces their results
//! once the prize window closes. Also carries maintenance subcommands for
//! question import and wallet reconciliation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use quizround_core::config::QuizConfig;
use quizround_core::lifecycle::RoundLifecycle;
use quizround_core::model::QuestionImport;
use quizround_core::store::QuizStore;
use quizround_core::wallet::WalletLedger;
use quizround_daemon::{DaemonState, EffectRunner, LogAnnouncer, TickDriver};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// quizroundd - scheduled quiz round daemon
#[derive(Parser, Debug)]
#[command(name = "quizroundd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "quizround.toml")]
    config: PathBuf,

    /// Path to the database, overriding `daemon.db_path`
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file path (logs to stdout if not specified)
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tick loop (default)
    Run,

    /// Insert or replace questions from a JSON array file
    ImportQuestions {
        /// JSON file of question records
        file: PathBuf,
    },

    /// List wallets whose balance disagrees with their transaction log
    Reconcile,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    init_logging(&args)?;

    let mut config = load_config(&args.config)?;
    if let Some(db) = &args.db {
        config.daemon.db_path.clone_from(db);
    }

    let store = QuizStore::open(&config.daemon.db_path).with_context(|| {
        format!(
            "failed to open database {}",
            config.daemon.db_path.display()
        )
    })?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(store, &config).await,
        Command::ImportQuestions { file } => import_questions(&store, &file),
        Command::Reconcile => reconcile(store, &config),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<QuizConfig> {
    if path.exists() {
        let config = QuizConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(QuizConfig::default())
    }
}

async fn run(store: QuizStore, config: &QuizConfig) -> Result<()> {
    let questions = store.question_count()?;
    if questions == 0 {
        warn!("question bank is empty; rounds will not open until questions are imported");
    }

    let lifecycle = RoundLifecycle::from_config(store, config).context("invalid schedule")?;
    let schedule = lifecycle.schedule();
    let round_duration_secs = schedule.round_duration().num_seconds();
    let next_slot = schedule.next_slot_after(Utc::now());
    let state = Arc::new(DaemonState::new());
    let runner = EffectRunner::new(
        lifecycle.clone(),
        Arc::new(LogAnnouncer),
        config.daemon.max_announce_attempts,
    );
    let driver = TickDriver::new(
        lifecycle,
        runner,
        Arc::clone(&state),
        Duration::from_secs(config.daemon.tick_interval_secs),
    );

    info!(
        slots = ?config.schedule.slots,
        %next_slot,
        round_duration_secs,
        questions,
        db_path = %config.daemon.db_path.display(),
        "quizroundd starting"
    );

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    let signal_state = Arc::clone(&state);
    let signal_task = tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
        signal_state.request_shutdown();
    });

    driver.run().await;
    signal_task.abort();

    info!(uptime_secs = state.uptime_secs(), "quizroundd stopped");
    Ok(())
}

fn import_questions(store: &QuizStore, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let questions: Vec<QuestionImport> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse questions from {}", file.display()))?;

    let ids = store
        .import_questions(&questions)
        .context("failed to import questions")?;
    println!(
        "imported {} questions ({} in bank)",
        ids.len(),
        store.question_count()?
    );
    Ok(())
}

fn reconcile(store: QuizStore, config: &QuizConfig) -> Result<()> {
    let ledger = WalletLedger::new(store, &config.wallet);
    let discrepancies = ledger.discrepancies()?;

    if discrepancies.is_empty() {
        println!("all wallets reconcile");
        return Ok(());
    }

    for rec in &discrepancies {
        error!(
            participant_id = %rec.participant_id,
            balance = rec.balance,
            total_won = rec.total_won,
            total_withdrawn = rec.total_withdrawn,
            "wallet disagrees with its transaction log"
        );
        println!(
            "{}\tbalance={}\twon={}\twithdrawn={}",
            rec.participant_id, rec.balance, rec.total_won, rec.total_withdrawn
        );
    }
    bail!("{} wallet(s) failed reconciliation", discrepancies.len())
}
