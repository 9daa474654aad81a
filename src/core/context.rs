//! Dependencies for one process, constructed once at startup and passed down.

use std::sync::Arc;

use crate::core::config::{Config, ConfigError};
use crate::core::persistence::{FileGateway, MemoryGateway, PersistenceGateway};
use crate::core::providers::{pick_default_model, pick_default_provider, ProviderKind};
use crate::core::store::{ConversationStore, StoreError, StoreEvents, StoreOptions};
use crate::core::usage::PricingTable;
use crate::providers::AdapterRegistry;

pub struct ChatContext {
    pub config: Arc<Config>,
    pub pricing: Arc<PricingTable>,
    pub adapters: Arc<AdapterRegistry>,
    pub gateway: Arc<dyn PersistenceGateway>,
}

impl ChatContext {
    /// History is kept as JSON files in the configured data directory.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let data_dir = config.resolve_data_dir()?;
        Ok(Self::with_gateway(config, Arc::new(FileGateway::new(data_dir))))
    }

    /// Nothing outlives the process.
    pub fn ephemeral(config: Config) -> Self {
        Self::with_gateway(config, Arc::new(MemoryGateway::new()))
    }

    pub fn with_gateway(config: Config, gateway: Arc<dyn PersistenceGateway>) -> Self {
        let pricing = Arc::new(PricingTable::builtin_with_overrides(&config.pricing));
        let adapters = Arc::new(AdapterRegistry::from_config(&config, Arc::clone(&pricing)));
        Self {
            config: Arc::new(config),
            pricing,
            adapters,
            gateway,
        }
    }

    pub async fn open_store(&self) -> Result<(ConversationStore, StoreEvents), StoreError> {
        ConversationStore::open(
            Arc::clone(&self.gateway),
            Arc::clone(&self.adapters),
            StoreOptions::from_config(&self.config),
        )
        .await
    }

    /// Provider and model for a new conversation, honouring explicit choices.
    pub fn selection(&self, provider: Option<ProviderKind>, model: Option<&str>) -> (ProviderKind, String) {
        let kind = pick_default_provider(&self.config, provider, |name| std::env::var(name).ok());
        let model = pick_default_model(&self.config, kind, model);
        (kind, model)
    }
}
