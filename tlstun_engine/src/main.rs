mod cli;

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use tlstun_shared::config::Config;
use tlstun_shared::logging;
use tlstun_shared::supervisor::{RunOutcome, Supervisor};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match cli::Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tlstun: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = logging::init_logging_from_config(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        role = ?config.role,
        interface = %config.interface.name,
        port = config.network.port,
        "Starting tlstun"
    );

    let outcome = match Supervisor::new(config).run().await {
        Ok(outcome) => outcome,
        Err(e) if e.is_setup_failure() => return Err(e).context("Tunnel setup failed"),
        Err(e) => return Err(e).context("Tunnel stopped"),
    };

    match outcome {
        RunOutcome::Server(report) => info!(
            session_id = %report.session_id,
            packets_sent = report.packets_sent(),
            packets_received = report.packets_received(),
            "Session ended"
        ),
        RunOutcome::Client(outcome) => info!(
            attempts = outcome.attempts,
            sessions = outcome.sessions,
            "Client finished"
        ),
    }
    Ok(())
}
