//! Built-in provider catalogue
//!
//! The catalogue is embedded from `builtin_providers.toml` at build time and
//! describes the default endpoint, default model, and wire mode for each
//! provider confab supports.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::core::providers::ProviderKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub default_model: String,
    pub mode: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BuiltinProvidersConfig {
    providers: Vec<BuiltinProvider>,
}

static BUILTIN_PROVIDERS: LazyLock<Vec<BuiltinProvider>> = LazyLock::new(|| {
    const CONFIG_CONTENT: &str = include_str!("../builtin_providers.toml");

    let config: BuiltinProvidersConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtin_providers.toml");

    config.providers
});

impl BuiltinProvider {
    /// Wire protocol spoken by this provider
    pub fn wire_mode(&self) -> &str {
        self.mode.as_deref().unwrap_or("openai")
    }

    /// Check if this provider uses Anthropic-style authentication
    pub fn is_anthropic_mode(&self) -> bool {
        self.wire_mode() == "anthropic"
    }
}

/// All built-in providers, in catalogue order
pub fn builtin_providers() -> &'static [BuiltinProvider] {
    &BUILTIN_PROVIDERS
}

/// Find a built-in provider by ID (case-insensitive)
pub fn find_builtin_provider(id: &str) -> Option<&'static BuiltinProvider> {
    BUILTIN_PROVIDERS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
}

/// Catalogue entry for a provider kind.
///
/// Every `ProviderKind` has an entry; the catalogue test guards this.
pub fn builtin_for(kind: ProviderKind) -> Option<&'static BuiltinProvider> {
    find_builtin_provider(kind.id())
}
