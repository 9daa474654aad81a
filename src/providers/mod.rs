//! Provider adapters: one wire protocol each behind a shared trait.
//!
//! Adapters are effectively single-flight. Each instance keeps one usage slot
//! that the most recent stream fills once it drains, so callers must not run
//! two streams through the same instance at once.

pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod retry;
pub mod sse;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

use crate::core::config::Config;
use crate::core::message::Message;
use crate::core::providers::{ProviderKind, ProviderSettings};
use crate::core::usage::{PricingTable, TokenUsage};

pub use error::ProviderError;
pub use retry::RetryPolicy;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Incremental text deltas of one streamed completion.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Result of a non-streaming round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Open a fresh stream. The returned sequence ends when the provider
    /// signals completion; dropping it closes the transport.
    async fn stream_completion(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<DeltaStream, ProviderError>;

    async fn get_completion(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Completion, ProviderError>;

    /// Usage captured by the most recent stream that ran to completion.
    fn last_stream_usage(&self) -> Option<TokenUsage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    pub retry: RetryPolicy,
    pub recover_missing_usage: bool,
}

impl AdapterOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            recover_missing_usage: config.recovers_missing_usage(),
        }
    }
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            recover_missing_usage: true,
        }
    }
}

/// Single usage slot shared between an adapter and the streams it opens.
#[derive(Debug, Clone, Default)]
pub struct UsageSlot(Arc<Mutex<Option<TokenUsage>>>);

impl UsageSlot {
    fn lock(&self) -> MutexGuard<'_, Option<TokenUsage>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> Option<TokenUsage> {
        self.lock().clone()
    }

    pub fn set(&self, usage: Option<TokenUsage>) {
        *self.lock() = usage;
    }

    pub fn clear(&self) {
        self.set(None);
    }
}

/// Build a priced [`TokenUsage`] from raw counts, or `None` when the provider
/// reported no counts at all.
pub(crate) fn priced_usage(
    kind: ProviderKind,
    model: &str,
    counts: (Option<u64>, Option<u64>, Option<u64>),
    raw: Value,
    pricing: &PricingTable,
) -> Option<TokenUsage> {
    let (prompt, completion, total) = counts;
    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }
    Some(
        TokenUsage::new(kind, model)
            .with_tokens(prompt, completion, total)
            .with_raw_payload(raw)
            .priced(pricing),
    )
}

pub fn create_adapter(
    settings: ProviderSettings,
    pricing: Arc<PricingTable>,
    options: AdapterOptions,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Ok(match settings.kind {
        ProviderKind::OpenAI => Arc::new(openai::OpenAiAdapter::new(settings, pricing, options)?),
        ProviderKind::Anthropic => {
            Arc::new(anthropic::AnthropicAdapter::new(settings, pricing, options)?)
        }
        ProviderKind::Gemini => Arc::new(gemini::GeminiAdapter::new(settings, pricing, options)?),
    })
}

pub type AdapterFactory =
    Box<dyn Fn(ProviderKind) -> Result<Arc<dyn ProviderAdapter>, ProviderError> + Send + Sync>;

/// One adapter per provider, created on first use.
pub struct AdapterRegistry {
    factory: Option<AdapterFactory>,
    adapters: Mutex<HashMap<ProviderKind, Arc<dyn ProviderAdapter>>>,
}

impl AdapterRegistry {
    pub fn new(factory: AdapterFactory) -> Self {
        Self {
            factory: Some(factory),
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// Adapters resolved from `config` with environment fallback.
    pub fn from_config(config: &Config, pricing: Arc<PricingTable>) -> Self {
        let config = config.clone();
        Self::new(Box::new(move |kind| {
            create_adapter(
                ProviderSettings::resolve(kind, &config),
                Arc::clone(&pricing),
                AdapterOptions::from_config(&config),
            )
        }))
    }

    /// A registry that only knows the given adapters.
    pub fn fixed(adapters: impl IntoIterator<Item = Arc<dyn ProviderAdapter>>) -> Self {
        let registry = Self {
            factory: None,
            adapters: Mutex::new(HashMap::new()),
        };
        for adapter in adapters {
            registry.insert(adapter);
        }
        registry
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProviderKind, Arc<dyn ProviderAdapter>>> {
        self.adapters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, adapter: Arc<dyn ProviderAdapter>) {
        self.lock().insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let mut adapters = self.lock();
        if let Some(adapter) = adapters.get(&kind) {
            return Ok(Arc::clone(adapter));
        }
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| ProviderError::configuration(kind, "no adapter registered"))?;
        let adapter = factory(kind)?;
        adapters.insert(kind, Arc::clone(&adapter));
        Ok(adapter)
    }
}
