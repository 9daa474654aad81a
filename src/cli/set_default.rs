//! Persist the provider (and optionally model) used for new conversations.

use std::error::Error;
use std::path::Path;

use crate::core::config::Config;
use crate::core::providers::ProviderKind;

pub fn set_default(
    config_path: &Path,
    provider: ProviderKind,
    model: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load_from_path(config_path)?;
    apply_default(&mut config, provider, model);
    config.save_to_path(config_path)?;

    match config.get_default_model(provider.id()) {
        Some(model) => println!("✅ Set default provider to: {provider} (model: {model})"),
        None => println!(
            "✅ Set default provider to: {provider} (model: built-in default {})",
            provider.default_model()
        ),
    }
    Ok(())
}

/// Without a model the provider's built-in default applies again.
fn apply_default(config: &mut Config, provider: ProviderKind, model: Option<&str>) {
    config.default_provider = Some(provider.id().to_string());
    match model.map(str::trim).filter(|model| !model.is_empty()) {
        Some(model) => config.set_default_model(provider.id().to_string(), model.to_string()),
        None => config.unset_default_model(provider.id()),
    }
}
