mod config;
mod inspector;
mod notifier;
mod retry;
mod watchdog;

use clap::Parser;
use config::Settings;
use inspector::SqliteInspector;
use notifier::AlertMessage;
use std::path::PathBuf;
use watchdog::RunOutcome;

/// Exit code used when the loop is interrupted with Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

/// A database liveness watchdog: sample every table's row count on a fixed
/// interval and send an alert when nothing changes between checks.
#[derive(Parser, Debug)]
#[command(name = "tablewatch", version, about)]
pub struct Cli {
    /// Directory holding config.toml, database.toml and mail.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Configuration mode (default: $TABLEWATCH_MODE, then "development")
    #[arg(short, long)]
    mode: Option<String>,

    /// Minutes between checks (overrides config)
    #[arg(long)]
    frequency: Option<u64>,

    /// Alerts per quiet spell before exiting (overrides config)
    #[arg(long)]
    max_tries: Option<u32>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-table counts and changes)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tablewatch={level}").into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    std::process::exit(execute(cli).await);
}

/// Run the watchdog and map the outcome to a process exit code.
async fn execute(cli: Cli) -> i32 {
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "tablewatch stopped");
            1
        }
    }
}

async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let mode = config::resolve_mode(
        cli.mode.as_deref(),
        std::env::var(config::MODE_ENV_VAR).ok(),
    );
    tracing::info!(%mode, "current mode");

    let mut settings = config::load_from_dir(&cli.config_dir, &mode)?;
    apply_overrides(&mut settings, &cli);
    settings.validate()?;

    if cli.dry_run {
        print_settings(&settings);
        return Ok(0);
    }

    let inspector = SqliteInspector::open(&settings.database.database)?;
    let message = AlertMessage::from_settings(&settings.mail);
    let notifier = notifier::build_notifier(&settings.mail)?;

    let state = watchdog::initialize(&settings.watch, &mode, &inspector)?;
    tracing::info!(
        mode = state.mode(),
        tables = state.snapshots().len(),
        max_tries = state.max_tries(),
        "checking all tables every {} minutes, Ctrl-C to exit",
        settings.watch.frequency
    );

    // Ticks block this task, so Ctrl-C lands between ticks
    tokio::select! {
        outcome = watchdog::run(state, &inspector, notifier.as_ref(), &message) => {
            let RunOutcome::Exhausted { ticks, alerts_sent } = outcome?;
            tracing::warn!(ticks, alerts_sent, "database stayed inactive past max tries, exiting");
            Ok(0)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, exiting");
            Ok(EXIT_INTERRUPTED)
        }
    }
}

/// Merge CLI flags over file settings.
fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(frequency) = cli.frequency {
        settings.watch.frequency = frequency;
    }
    if let Some(max_tries) = cli.max_tries {
        settings.watch.max_tries = max_tries;
    }
}

fn print_settings(settings: &Settings) {
    println!("tablewatch v{}", env!("CARGO_PKG_VERSION"));
    println!("Mode:        {}", settings.mode);
    println!("Frequency:   every {} minute(s)", settings.watch.frequency);
    println!("Max tries:   {}", settings.watch.max_tries);
    println!(
        "Database:    {} ({})",
        settings.database.database.display(),
        settings.database.adapter
    );
    println!(
        "Alerts:      {} -> {} via {:?}",
        settings.mail.from, settings.mail.to, settings.mail.delivery_method
    );
    println!("Subject:     {}", settings.mail.subject);
    println!("Dry run: config validated, not running.");
}
