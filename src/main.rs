use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use risk_triage::classifier::RiskClassifier;
use risk_triage::config::AppConfig;
use risk_triage::logging::{init_logging, OperationTimer};
use risk_triage::planner::generate_crisis_response;
use risk_triage::service::TriageService;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the triage service until interrupted
    Serve,
    /// Classify a single piece of text and print the assessment
    Assess {
        /// Text to classify
        #[arg(short, long)]
        text: String,

        /// Profile identifier to attribute the assessment to
        #[arg(short, long, default_value = "anonymous")]
        profile: String,

        /// Also print the planned crisis response
        #[arg(long)]
        with_response: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(std::path::Path::new),
    )
    .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::Assess {
            text,
            profile,
            with_response,
        } => assess(&text, &profile, with_response),
    }
}

async fn serve(config: &AppConfig) -> Result<()> {
    let service = TriageService::start(config)
        .await
        .context("Failed to start triage service")?;

    info!("Serving; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    service.shutdown().await;
    Ok(())
}

fn assess(text: &str, profile: &str, with_response: bool) -> Result<()> {
    let timer = OperationTimer::new("assess");
    let classifier = RiskClassifier::new().context("Failed to build classifier")?;
    let assessment = classifier.assess_risk(profile, text);

    println!("{}", serde_json::to_string_pretty(&assessment)?);
    if with_response {
        let response = generate_crisis_response(&assessment);
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    timer.finish();
    Ok(())
}
