//! Entrypoint of the draino binary
use anyhow::Context;
use clap::Parser;
use draino::config::{Cli, Command, DrainConfig, FileConfig};
use draino::consumers::{ConsumerBuilder, JsonValueDeserializer, Pipeline};
use draino::drain::DrainRun;
use draino::fill::{fill, FillSettings};
use serde_json::Value;
use tracing::{error, info};

enum ReturnCode {
    Failure = 1,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.logging.install_global_subscriber() {
        eprintln!("Failed to initialize logging: {e:#}");
        std::process::exit(ReturnCode::Failure as _);
    }

    if let Err(e) = run(cli).await {
        error!(error = ?e, "draino failed");
        std::process::exit(ReturnCode::Failure as _);
    }
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let file = FileConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Drain(args) => drain(DrainConfig::resolve(&cli.source, &args, &file)?).await,
        Command::Fill(args) => {
            let settings = FillSettings::resolve(&cli.source, &args, &file)?;
            let written = fill(settings).await?;
            info!(written, "Done filling");
            Ok(())
        }
        Command::Move => {
            info!("move is not implemented yet");
            Ok(())
        }
    }
}

async fn drain(config: DrainConfig) -> Result<(), anyhow::Error> {
    let run = DrainRun::new(config.destructive);
    let pipeline = Pipeline::new(
        JsonValueDeserializer::<Value>::new(),
        run.message_handler(std::io::stdout()),
        run.disposition_handler(),
    )
    .suppress_processing_errors(true)
    .processing_delay(config.processing_delay);

    let consumer = ConsumerBuilder::new(config.rabbitmq, config.topology)
        .prefetch_count(config.prefetch)
        .connect(pipeline)
        .await
        .context("Failed to set up the consumer")?;

    let outcome = run.run_until_signal(&consumer).await?;
    info!(
        reason = ?outcome.reason,
        drained = outcome.rendered,
        destructive = config.destructive,
        "Done draining"
    );
    Ok(())
}
