use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use timeslot_core::Result;
use timeslot_controller::config::ControllerConfig;
use timeslot_controller::error::ControllerError;
use timeslot_controller::handler::{handle_payload, read_event, serve};
use timeslot_controller::runtime::RuntimeClient;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Turns reservation row changes into one-shot scheduled triggers
#[derive(Parser)]
#[command(name = "timeslot-controller")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve invocations from the function runtime API (default)
    Run,

    /// Process one change-feed batch and print the batch response
    Process {
        /// Path to the event JSON (default: stdin)
        #[arg(long)]
        event: Option<PathBuf>,

        /// Processing budget in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Stdout carries the batch response for `process`
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = ControllerConfig::from_env().map_err(|e| ControllerError::Config {
        details: e.to_string(),
    })?;
    tracing::info!(
        group = %config.schedule_group_name,
        timezone = %config.schedule_timezone,
        max_concurrency = config.max_concurrency,
        "Loaded configuration"
    );

    let processor = config.processor(config.trigger_service()?)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let api = config
                .aws_lambda_runtime_api
                .as_deref()
                .ok_or_else(|| ControllerError::Config {
                    details: "AWS_LAMBDA_RUNTIME_API is not set".to_string(),
                })?;
            let runtime = RuntimeClient::new(api)?;

            tokio::select! {
                result = serve(&processor, &runtime) => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                }
            }
        }
        Command::Process { event, deadline_ms } => {
            let payload = read_event(event.as_deref()).await?;
            let deadline = deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
            let response = handle_payload(&processor, &payload, deadline).await?;
            let json = serde_json::to_string(&response).map_err(|e| ControllerError::Output {
                details: e.to_string(),
            })?;
            println!("{json}");
        }
    }

    Ok(())
}
