//! kpng entry point.

use clap::Parser;
use kpng::cli::Cli;
use kpng::logging::init_logging;
use kpng::KpngConfig;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A blocking stdin read must not hold up exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match KpngConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kpng: {}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("kpng: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("kpng: {:#}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let options = cli.run_options();
    let code = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                on_signal.cancel();
            }
        });

        match kpng::run(&options, config, cancel).await {
            Ok(()) => {
                info!("kpng exiting normally");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "kpng exiting with error");
                ExitCode::FAILURE
            }
        }
    });

    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    code
}
