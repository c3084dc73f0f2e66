use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portalwatch::prelude::*;
use portalwatch::scheduler::recovery::FATAL_EXIT_CODE;

#[derive(Parser)]
#[command(
    name = "portalwatch",
    version,
    about = "Periodic portal checks with rotating fingerprints and webhook delivery",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the config file setting
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run checks on the configured interval until interrupted
    Run,

    /// Run a single check cycle and print its result
    Check,

    /// Validate the configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    let code = match cli.command {
        Commands::Run => run(config).await?,
        Commands::Check => check(config).await?,
        Commands::Validate => {
            validate(&config);
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(filter) => tracing_subscriber::EnvFilter::new(filter),
        Err(_) if verbose => tracing_subscriber::EnvFilter::new("portalwatch=debug,info"),
        Err(_) => tracing_subscriber::EnvFilter::new(format!("portalwatch={level},warn")),
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<CheckEngine> {
    let portal = Arc::new(HttpPortal::new(config.portal.clone()).context("Invalid portal settings")?);
    let parser = Arc::new(MutationParser::new());

    let engine = CheckEngine::new(
        EngineConfig::from_config(config),
        Collaborators::from_portal(portal, parser),
    )
    .context("Failed to build check engine")?;

    Ok(engine)
}

async fn run(config: Config) -> Result<i32> {
    let engine = Arc::new(build_engine(&config)?);
    let mut results = engine.subscribe();

    tracing::info!(
        interval_ms = config.scheduler.interval_ms,
        "portalwatch starting"
    );
    engine.start();

    let code = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                tracing::info!("Shutdown requested");
                break 0;
            }
            received = results.recv() => match received {
                Ok(result) => {
                    if let Some(code) = result.exit_code() {
                        tracing::error!(
                            error = result.error.as_deref().unwrap_or_default(),
                            exit_code = code,
                            "Fatal failure, shutting down"
                        );
                        break code;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Result stream lagged");
                }
                Err(RecvError::Closed) => break FATAL_EXIT_CODE,
            }
        }
    };

    engine.stop();
    Ok(code)
}

async fn check(config: Config) -> Result<i32> {
    let engine = build_engine(&config)?;
    let result = engine.execute_check().await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(match result.exit_code() {
        Some(code) => code,
        None if result.success => 0,
        None => FATAL_EXIT_CODE,
    })
}

fn validate(config: &Config) {
    println!("Configuration is valid");
    println!("  Portal: {}", config.portal.base_url);
    println!("  Interval: {}ms", config.scheduler.interval_ms);
    println!(
        "  Environments: {}",
        config
            .rotation
            .environments
            .iter()
            .map(|e| e.id())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Identities: {}",
        if config.rotation.identities.is_empty() {
            "built-in".to_string()
        } else {
            config.rotation.identities.len().to_string()
        }
    );
    println!(
        "  Egress routes: {}{}",
        config.rotation.egress_routes.len(),
        if config.rotation.routing_enabled {
            ""
        } else {
            " (routing disabled)"
        }
    );
    match &config.delivery {
        Some(delivery) => println!(
            "  Delivery: {} ({} attempts)",
            delivery.url, delivery.max_attempts
        ),
        None => println!("  Delivery: disabled"),
    }
}
