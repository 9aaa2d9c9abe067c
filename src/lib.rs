//! CIS2 Broker Library
//!
//! Identity federation broker between a Cognito user pool and the CIS2
//! OpenID Connect provider, with a parallel mock provider for non-production
//! environments.
//!
//! # Features
//!
//! - **State mapping**: Session provider state is swapped for a single-use
//!   broker token across the upstream hop
//! - **Private key JWT**: Token exchange authenticates with an RS512 client
//!   assertion instead of a client secret
//! - **Session identity**: Every token mint gets its own session id
//! - **Concurrency**: Detects and resolves concurrent sessions per user
//! - **Pull-request relay**: Ephemeral environments share one registered callback
//!
//! # Example
//!
//! ```no_run
//! use cis2_broker::{auth::JwksVerifier, broker::Broker, config::Config, secrets, store::Stores};
//! use cis2_broker::server::{AppState, Server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::load("config.yaml")?);
//!     let stores = Stores::from_config(&config.storage, &config.tables).await;
//!     let secrets = secrets::from_config(&config.secrets).await;
//!     let verifier = JwksVerifier::new(&config.session_provider.jwks_url).await?;
//!
//!     let state = AppState {
//!         broker: Broker::new(config.clone(), stores, secrets),
//!         verifier: Arc::new(verifier),
//!     };
//!     Server::bind(&config.server.address, state).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod secrets;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use broker::Broker;
pub use config::Config;
pub use error::BrokerError;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
