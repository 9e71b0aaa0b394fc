use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use inbox_responder::channels::create_mailbox;
use inbox_responder::config::{DEFAULT_CONFIG_PATH, RunConfig};
use inbox_responder::interactions::create_logger;
use inbox_responder::llm::create_generator;
use inbox_responder::pipeline::{Adapters, PollLoop, RunMode, RunSummary};
use inbox_responder::shutdown::ShutdownSignal;

/// Answer unread email with LLM-drafted replies and log every interaction.
#[derive(Parser, Debug)]
#[command(name = "inbox-responder", version)]
struct Cli {
    /// Run a single pass and exit
    #[arg(long, visible_alias = "single-run")]
    single: bool,

    /// Seconds to sleep between cycles in continuous mode
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug-level diagnostics
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match RunConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match init_tracing(cli.verbose, config.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(path = %cli.config.display(), "Configuration loaded");

    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mode = if cli.single {
        RunMode::SinglePass
    } else {
        RunMode::Continuous(Duration::from_secs(cli.interval))
    };

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run(config, mode)));

    match result {
        Ok(summary) => {
            tracing::info!(
                cycles = summary.cycles,
                sent = summary.totals.sent,
                skipped = summary.totals.skipped,
                failed = summary.totals.failed,
                "Run finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Run aborted");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RunConfig, mode: RunMode) -> anyhow::Result<RunSummary> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.email_address,
        mode = ?mode,
        "inbox-responder starting"
    );

    // Registered before the first cycle so a signal mid-send waits for it.
    let shutdown = ShutdownSignal::install().context("Failed to install signal handlers")?;

    let (source, sink) = create_mailbox(&config).context("Failed to set up mailbox")?;
    let generator = create_generator(&config.llm, &config.assistant.persona)
        .context("Failed to set up response generator")?;
    let logger = create_logger(&config.sink).context("Failed to set up interaction log")?;

    let mut poll = PollLoop::new(
        Adapters {
            source,
            sink,
            generator,
            logger,
        },
        &config.email_address,
        &config.assistant,
    );

    let summary = poll.run(mode, shutdown.recv()).await?;
    Ok(summary)
}

/// Stderr plus an optional plain-text file layer.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path {} has no file name", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_continuous_five_minutes() {
        let cli = Cli::try_parse_from(["inbox-responder"]).unwrap();
        assert!(!cli.single);
        assert_eq!(cli.interval, 300);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert!(!cli.verbose);
    }

    #[test]
    fn single_run_alias() {
        let cli = Cli::try_parse_from(["inbox-responder", "--single-run"]).unwrap();
        assert!(cli.single);
        let cli = Cli::try_parse_from(["inbox-responder", "--single", "--config", "alt.toml"]).unwrap();
        assert!(cli.single);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Cli::try_parse_from(["inbox-responder", "--interval", "0"]).is_err());
    }
}
