//! Application state

use std::sync::Arc;

use lavarelay_shared::AttributionStore;

use crate::{
    config::Config,
    forwarder::{ForwardError, Forwarder},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: AttributionStore,
    pub forwarder: Forwarder,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ForwardError> {
        let store = AttributionStore::open(&config.database_path);
        tracing::info!(path = %config.database_path.display(), "Attribution store configured");

        let forwarder = Forwarder::new(&config)?;
        tracing::info!(
            timeout_secs = config.salebot_api_timeout_secs,
            "Chatter forwarder initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            forwarder,
        })
    }
}
