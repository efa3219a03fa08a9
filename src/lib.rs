pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

use std::sync::Arc;

use config::AppConfig;
use services::classifier::model_manager::ModelManager;
use services::classifier::ImageClassifier;
use services::session::{ClassificationSession, Gateway, SessionHandle, SessionOptions};

pub struct App {
    pub config: AppConfig,
    pub model_manager: ModelManager,
    pub session: SessionHandle,
}

/// Loads the model once and starts the session around it.
///
/// A model that fails to load does not stop startup: the session comes up
/// anyway and fails every request with `ModelUnavailable`.
pub async fn start(config: AppConfig) -> App {
    let model_manager = ModelManager::new(config.clone());

    let gateway: Gateway = model_manager
        .load()
        .await
        .map(|classifier| Arc::new(classifier) as Arc<dyn ImageClassifier>);

    let session = ClassificationSession::spawn(gateway, SessionOptions::from(&config));

    App {
        config,
        model_manager,
        session,
    }
}

/// Installs the `tracing` subscriber, honouring `RUST_LOG` with an `info` default.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
