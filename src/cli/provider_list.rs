use crate::core::config::Config;
use crate::core::providers::{pick_default_model, pick_default_provider, ProviderKind, ProviderSettings};

/// Provider overview as a plain-text table, with the default provider starred.
pub fn render_provider_table<F>(config: &Config, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let default_provider = pick_default_provider(config, None, &env);

    let mut table = String::from("Providers:\n\n");
    table.push_str("| Provider | Display Name | Endpoint | Default Model | API Key |\n");
    table.push_str("|---|---|---|---|:---:|\n");

    for kind in ProviderKind::ALL {
        let settings = ProviderSettings::resolve_with(kind, config, &env);
        let key_status = if settings.has_api_key() { "✅" } else { "❌" };
        let id = if kind == default_provider {
            format!("{kind}*")
        } else {
            kind.to_string()
        };
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            id,
            kind.display_name(),
            settings.endpoint,
            pick_default_model(config, kind, None),
            key_status
        ));
    }

    table.push_str("\n* = default provider\n");
    table
}
