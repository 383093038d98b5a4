use clap::Parser;
use log::{error, info};
use recovery_sync::constants::CONFIG_PATH_ENV;
use recovery_sync::{logging, RunController, SyncConfigLoader};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML or JSON configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,
}

/// Runs one reconciliation pass and exits.
///
/// Exit status is 0 when every queued change is reflected in the target and
/// 1 when any stage failed; the failure message names the stage and, for
/// list failures, the index a re-run resumes from.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match SyncConfigLoader::new().load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Result is {} failed: {}", e.stage(), e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);
    info!(
        "Loaded configuration from {}",
        SyncConfigLoader::describe_source(cli.config.as_deref())
    );

    match RunController::new(config).run().await {
        Ok(_) => {
            info!("Process SUCCESS");
            println!("Process SUCCESS");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let resume = e
                .cursor()
                .map(|index| format!(" (resume at index {})", index))
                .unwrap_or_default();
            error!("Process FAILED");
            eprintln!("Result is {} failed: {}{}", e.stage(), e, resume);
            ExitCode::FAILURE
        }
    }
}
