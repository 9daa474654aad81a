use crate::core::config::data::{Config, ProviderConfig, DEFAULT_CACHE_CAPACITY};

impl Config {
    pub fn get_default_model(&self, provider: &str) -> Option<&String> {
        let normalized = provider.to_lowercase();
        self.default_models
            .get(&normalized)
            .or_else(|| self.default_models.get(provider))
    }

    pub fn set_default_model(&mut self, provider: String, model: String) {
        let normalized = provider.to_lowercase();
        self.default_models.insert(normalized.clone(), model);
        if normalized != provider {
            self.default_models.remove(&provider);
        }
    }

    pub fn unset_default_model(&mut self, provider: &str) {
        let normalized = provider.to_lowercase();
        self.default_models.remove(&normalized);
        if normalized != provider {
            self.default_models.remove(provider);
        }
    }

    pub fn provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        let normalized = provider.to_lowercase();
        self.providers
            .get(&normalized)
            .or_else(|| self.providers.get(provider))
    }

    /// LRU capacity, never below one entry
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY).max(1)
    }

    pub fn recovers_missing_usage(&self) -> bool {
        self.recover_missing_usage.unwrap_or(true)
    }
}
