//! Provider identity and per-provider settings resolution.
//!
//! Settings come from the config file first and fall back to the
//! `{PROVIDER}_API_KEY` / `{PROVIDER}_API_ENDPOINT` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::core::builtin_providers::builtin_for;
use crate::core::config::Config;

/// The wire protocol family a conversation talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    pub fn display_name(self) -> &'static str {
        builtin_for(self)
            .map(|provider| provider.display_name.as_str())
            .unwrap_or_else(|| self.id())
    }

    fn env_prefix(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
            ProviderKind::Gemini => "GEMINI",
        }
    }

    pub fn api_key_var(self) -> String {
        format!("{}_API_KEY", self.env_prefix())
    }

    pub fn endpoint_var(self) -> String {
        format!("{}_API_ENDPOINT", self.env_prefix())
    }

    /// Gemini talks to a fixed Google endpoint; the others accept overrides.
    pub fn accepts_custom_endpoint(self) -> bool {
        !matches!(self, ProviderKind::Gemini)
    }

    pub fn default_endpoint(self) -> &'static str {
        builtin_for(self)
            .map(|provider| provider.base_url.as_str())
            .unwrap_or("")
    }

    pub fn default_model(self) -> &'static str {
        builtin_for(self)
            .map(|provider| provider.default_model.as_str())
            .unwrap_or("")
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl TryFrom<&str> for ProviderKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                format!("unknown provider '{value}' (expected one of: openai, anthropic, gemini)")
            })
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

/// Connection parameters handed to an adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// `None` when neither the config file nor the environment supplies a key;
    /// the adapter fails fast on first use.
    pub api_key: Option<String>,
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ProviderSettings {
    pub fn resolve(kind: ProviderKind, config: &Config) -> Self {
        Self::resolve_with(kind, config, |name| std::env::var(name).ok())
    }

    /// Resolve settings with an explicit environment lookup.
    pub fn resolve_with<F>(kind: ProviderKind, config: &Config, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = config.provider_config(kind.id());
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let api_key = non_empty(file.and_then(|p| p.api_key.clone()))
            .or_else(|| non_empty(env(&kind.api_key_var())));

        let endpoint = if kind.accepts_custom_endpoint() {
            non_empty(file.and_then(|p| p.endpoint.clone()))
                .or_else(|| non_empty(env(&kind.endpoint_var())))
                .unwrap_or_else(|| kind.default_endpoint().to_string())
        } else {
            kind.default_endpoint().to_string()
        };

        Self {
            kind,
            api_key,
            endpoint,
            connect_timeout: Duration::from_secs(config.network.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.network.read_timeout_secs),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Provider/model for new conversations: explicit choice, then config default,
/// then the first provider with a key, then OpenAI.
pub fn pick_default_provider<F>(
    config: &Config,
    explicit: Option<ProviderKind>,
    env: F,
) -> ProviderKind
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(kind) = explicit {
        return kind;
    }
    if let Some(kind) = config
        .default_provider
        .as_deref()
        .and_then(|id| ProviderKind::try_from(id).ok())
    {
        return kind;
    }
    ProviderKind::ALL
        .into_iter()
        .find(|kind| ProviderSettings::resolve_with(*kind, config, &env).has_api_key())
        .unwrap_or(ProviderKind::OpenAI)
}

pub fn pick_default_model(config: &Config, kind: ProviderKind, explicit: Option<&str>) -> String {
    explicit
        .filter(|model| !model.trim().is_empty())
        .map(str::to_string)
        .or_else(|| config.get_default_model(kind.id()).cloned())
        .unwrap_or_else(|| kind.default_model().to_string())
}
