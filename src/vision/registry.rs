use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{LlmConfig, ProviderEntry};
use crate::errors::{TileGridError, TileGridResult};
use crate::vision::provider::VisionClassifier;
use crate::vision::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::vision::types::CallConfig;

/// Configured vision providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderEntry>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            providers: config.providers.clone(),
            active: config.active_provider.clone(),
            llm_config: config.clone(),
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Provider id and call parameters for the vision role.
    ///
    /// Resolution order:
    /// 1. `[llm.vision]` in config.toml
    /// 2. the active provider with its default model and temperature
    pub fn resolve_vision(&self) -> TileGridResult<(String, CallConfig)> {
        if let Some(role) = &self.llm_config.vision {
            let entry = self.providers.get(&role.provider).ok_or_else(|| {
                TileGridError::Config(format!(
                    "vision role references unknown provider '{}'",
                    role.provider
                ))
            })?;
            let temperature = role.temperature.unwrap_or(entry.temperature);
            tracing::debug!(provider = %role.provider, model = %role.model, temperature, "resolved vision role");
            return Ok((
                role.provider.clone(),
                CallConfig { model: role.model.clone(), temperature },
            ));
        }

        let entry = self.providers.get(&self.active).ok_or_else(|| {
            TileGridError::Config(format!("active provider '{}' not configured", self.active))
        })?;
        tracing::debug!(provider = %self.active, model = %entry.model, "vision role not configured, using active provider");
        Ok((
            self.active.clone(),
            CallConfig { model: entry.model.clone(), temperature: entry.temperature },
        ))
    }

    /// API key from `TILEGRID_<ID>_API_KEY`, falling back to the config value.
    fn api_key(id: &str, entry: &ProviderEntry) -> String {
        std::env::var(api_key_var(id)).unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default())
    }

    /// Build the classifier used by every vision call of a session.
    pub fn vision_classifier(&self) -> TileGridResult<Arc<dyn VisionClassifier>> {
        let (id, call) = self.resolve_vision()?;
        let entry = self
            .providers
            .get(&id)
            .ok_or_else(|| TileGridError::Config(format!("provider '{id}' not configured")))?;
        let api_key = Self::api_key(&id, entry);
        if api_key.is_empty() {
            tracing::warn!(provider = %id, var = %api_key_var(&id), "no API key configured");
        }
        Ok(Arc::new(OpenAiCompatibleProvider::new(
            id,
            entry.api_base.clone(),
            api_key,
            call,
        )))
    }
}

pub fn api_key_var(id: &str) -> String {
    format!("TILEGRID_{}_API_KEY", id.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoleEntry;

    fn llm_config() -> LlmConfig {
        let mut providers = HashMap::new();
        for (id, model) in [("openai", "gpt-4.1-mini"), ("zhipu", "glm-4v-flash")] {
            providers.insert(
                id.to_string(),
                ProviderEntry {
                    display_name: id.to_uppercase(),
                    api_base: format!("https://{id}.example/v1/chat/completions"),
                    model: model.into(),
                    temperature: 0.2,
                    api_key: None,
                },
            );
        }
        LlmConfig { active_provider: "openai".into(), providers, vision: None }
    }

    #[test]
    fn falls_back_to_active_provider() {
        let registry = ProviderRegistry::from_config(&llm_config());
        let (id, call) = registry.resolve_vision().unwrap();
        assert_eq!(id, "openai");
        assert_eq!(call.model, "gpt-4.1-mini");
        assert_eq!(call.temperature, 0.2);
        assert_eq!(registry.list_names(), vec!["openai", "zhipu"]);
    }

    #[test]
    fn vision_role_overrides_model_and_temperature() {
        let mut cfg = llm_config();
        cfg.vision = Some(RoleEntry { provider: "zhipu".into(), model: "glm-4v-plus".into(), temperature: Some(0.0) });
        let (id, call) = ProviderRegistry::from_config(&cfg).resolve_vision().unwrap();
        assert_eq!(id, "zhipu");
        assert_eq!(call.model, "glm-4v-plus");
        assert_eq!(call.temperature, 0.0);
    }

    #[test]
    fn unknown_providers_are_config_errors() {
        let mut cfg = llm_config();
        cfg.vision = Some(RoleEntry { provider: "nope".into(), model: "m".into(), temperature: None });
        assert!(matches!(
            ProviderRegistry::from_config(&cfg).resolve_vision(),
            Err(TileGridError::Config(_))
        ));

        let mut cfg = llm_config();
        cfg.active_provider = "missing".into();
        assert!(ProviderRegistry::from_config(&cfg).vision_classifier().is_err());
    }

    #[test]
    fn key_variable_is_uppercased() {
        assert_eq!(api_key_var("openai"), "TILEGRID_OPENAI_API_KEY");
    }
}
