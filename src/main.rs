//! CIS2 Broker - identity federation between Cognito and CIS2

use clap::Parser;
use cis2_broker::auth::JwksVerifier;
use cis2_broker::server::{AppState, Server};
use cis2_broker::store::Stores;
use cis2_broker::{secrets, Broker, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// CIS2 Broker - Cognito to CIS2 identity federation
#[derive(Parser, Debug)]
#[command(name = "cis2-broker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting CIS2 Broker v{}", cis2_broker::VERSION);

    let config = Arc::new(Config::load(&args.config)?);
    info!("Loaded configuration from {:?}", args.config);
    if config.mock_mode_enabled {
        warn!("Mock mode is enabled; mock identities will be accepted");
    }

    let stores = Stores::from_config(&config.storage, &config.tables).await;
    let secrets = secrets::from_config(&config.secrets).await;

    let mut verifier = JwksVerifier::new(&config.session_provider.jwks_url)
        .await?
        .with_cache_ttl(Duration::from_secs(
            config.session_provider.jwks_cache_ttl_seconds,
        ));
    if let Some(ref issuer) = config.session_provider.issuer {
        verifier = verifier.with_issuer(issuer);
    }

    let state = AppState {
        broker: Broker::new(config.clone(), stores, secrets),
        verifier: Arc::new(verifier),
    };

    let server = Server::bind(&config.server.address, state).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
