//! Test-harness CLI: run one envelope through a root cell.
//!
//! Exit codes: 0 success, 1 partial output, 2 failure, 3 invalid envelope.
//!
//! Ctrl-C is forwarded into the root cell's cancellation signal: the
//! delegation tree gets the configured wind-down window to emit partial
//! envelopes instead of being killed mid-phase.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use hivecell::config::KernelConfig;
use hivecell::envelope::Envelope;
use hivecell::runtime::CellRuntime;
use hivecell::utils::testing::stub_collaborators;

#[derive(Parser)]
#[command(
    name = "hivecell",
    version,
    about = "Recursive cognitive-cell runtime",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read an envelope, run the root cell, write the result envelope.
    Run {
        /// Path to the request envelope (canonical JSON form).
        #[arg(long)]
        envelope: PathBuf,
        /// Where to write the reply envelope; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Seed for the offline inference stub.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_telemetry();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            envelope,
            output,
            seed,
        } => run(envelope, output, seed).await,
    }
}

async fn run(path: PathBuf, output: Option<PathBuf>, seed: u64) -> ExitCode {
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(error) => {
            eprintln!("cannot read {}: {error}", path.display());
            return ExitCode::from(3);
        }
    };
    let request = match Envelope::from_json(&raw) {
        Ok(request) => request,
        Err(error) => {
            eprintln!("invalid envelope: {error}");
            return ExitCode::from(3);
        }
    };

    let config = KernelConfig::from_env();
    if let Err(error) = config.validate() {
        eprintln!("invalid configuration: {error}");
        return ExitCode::from(3);
    }
    let runtime = CellRuntime::new(config, stub_collaborators(seed));

    // Ctrl-C requests cancellation; cells wind down and emit partials.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling the run");
            let _ = cancel_tx.send(true);
        }
    });

    let reply = runtime.process_with_cancel(request, cancel_rx).await;

    let rendered = match reply.to_json() {
        Ok(rendered) => rendered,
        Err(error) => {
            eprintln!("cannot serialise reply: {error}");
            return ExitCode::from(2);
        }
    };
    match output {
        Some(path) => {
            if let Err(error) = tokio::fs::write(&path, rendered).await {
                eprintln!("cannot write {}: {error}", path.display());
                return ExitCode::from(2);
            }
        }
        None => println!("{rendered}"),
    }

    for warning in &reply.stderr.warnings {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
    }
    for failure in &reply.stderr.failures {
        tracing::error!(kind = ?failure.kind, "{}", failure.message);
    }

    if reply.stdout_is_empty() && reply.stderr.has_failures() {
        ExitCode::from(2)
    } else if !reply.stderr.is_clean() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
