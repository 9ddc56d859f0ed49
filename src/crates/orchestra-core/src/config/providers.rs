//! Provider and model-alias resolution

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use super::settings::ProvidersConfig;

/// Resolve a provider name, falling back to the configured default
pub fn resolve_provider(provider_name: &str, providers: &ProvidersConfig) -> String {
    if provider_name.is_empty() {
        providers.default.clone()
    } else {
        provider_name.to_string()
    }
}

/// Resolve a model alias through the provider's alias table
///
/// Unknown aliases pass through unchanged so concrete model names work
/// everywhere an alias does.
pub fn resolve_model(alias: &str, provider_name: &str, providers: &ProvidersConfig) -> String {
    providers
        .providers
        .get(provider_name)
        .and_then(|p| p.models.get(alias))
        .cloned()
        .unwrap_or_else(|| alias.to_string())
}

pub fn provider_settings(
    provider_name: &str,
    providers: &ProvidersConfig,
) -> BTreeMap<String, JsonValue> {
    providers
        .providers
        .get(provider_name)
        .map(|p| p.settings.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::ProviderConfig;

    fn providers() -> ProvidersConfig {
        let mut config = ProvidersConfig { default: "anthropic".into(), ..Default::default() };
        let mut anthropic = ProviderConfig::default();
        anthropic.models.insert("cheap".into(), "claude-3-5-haiku".into());
        anthropic.settings.insert("max_tokens".into(), 4096.into());
        config.providers.insert("anthropic".into(), anthropic);
        config
    }

    #[test]
    fn test_provider_default() {
        let p = providers();
        assert_eq!(resolve_provider("", &p), "anthropic");
        assert_eq!(resolve_provider("openai", &p), "openai");
    }

    #[test]
    fn test_model_alias_resolution() {
        let p = providers();
        assert_eq!(resolve_model("cheap", "anthropic", &p), "claude-3-5-haiku");
        // Unknown aliases and providers pass through
        assert_eq!(resolve_model("claude-sonnet-4", "anthropic", &p), "claude-sonnet-4");
        assert_eq!(resolve_model("cheap", "openai", &p), "cheap");
    }

    #[test]
    fn test_settings_lookup() {
        let p = providers();
        assert_eq!(provider_settings("anthropic", &p)["max_tokens"], 4096);
        assert!(provider_settings("openai", &p).is_empty());
    }
}
