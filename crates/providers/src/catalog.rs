//! The model catalog (`models.json`).
//!
//! Three sections: `aliases` (name → ref), `providers` (id → api shape,
//! base URL, key env, model list), and per-model limits/capabilities.
//! Resolution: `provider/model` split on `/` → owning-provider lookup by
//! model id → prefix pattern match. A per-provider base-URL override env
//! var is applied last.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use bc_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiShape {
    Anthropic,
    Openai,
    Google,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelCapabilities {
    pub vision: bool,
    pub streaming: bool,
    pub tools: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            vision: false,
            streaming: true,
            tools: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDef {
    pub id: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_context_window")]
    pub context_window: u64,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
}

fn d_max_tokens() -> u32 {
    8192
}

fn d_context_window() -> u64 {
    200_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDef {
    pub api: ApiShape,
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default)]
    pub models: Vec<ModelDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelCatalog {
    pub aliases: HashMap<String, String>,
    pub providers: HashMap<String, ProviderDef>,
}

/// A fully resolved model: where to send requests and which limits apply.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub provider_id: String,
    pub api: ApiShape,
    pub base_url: String,
    pub api_key_env: String,
    pub model: ModelDef,
}

impl ModelCatalog {
    /// Load `models.json`, falling back to the built-in catalog when the
    /// file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::ConfigInvalid(format!("models.json: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::builtin()),
            Err(e) => Err(e.into()),
        }
    }

    /// The default catalog: one provider per api shape, keys from the
    /// conventional env vars.
    pub fn builtin() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "anthropic".to_string(),
            ProviderDef {
                api: ApiShape::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                api_key_env: "ANTHROPIC_API_KEY".into(),
                models: vec![ModelDef {
                    id: "claude-sonnet-4-20250514".into(),
                    max_tokens: 8192,
                    context_window: 200_000,
                    capabilities: ModelCapabilities {
                        vision: true,
                        ..Default::default()
                    },
                }],
            },
        );
        providers.insert(
            "openai".to_string(),
            ProviderDef {
                api: ApiShape::Openai,
                base_url: "https://api.openai.com/v1".into(),
                api_key_env: "OPENAI_API_KEY".into(),
                models: vec![ModelDef {
                    id: "gpt-4o".into(),
                    max_tokens: 16_384,
                    context_window: 128_000,
                    capabilities: ModelCapabilities {
                        vision: true,
                        ..Default::default()
                    },
                }],
            },
        );
        providers.insert(
            "google".to_string(),
            ProviderDef {
                api: ApiShape::Google,
                base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
                api_key_env: "GOOGLE_API_KEY".into(),
                models: vec![ModelDef {
                    id: "gemini-2.0-flash".into(),
                    max_tokens: 8192,
                    context_window: 1_000_000,
                    capabilities: ModelCapabilities {
                        vision: true,
                        ..Default::default()
                    },
                }],
            },
        );

        let mut aliases = HashMap::new();
        aliases.insert("default".to_string(), "anthropic/claude-sonnet-4-20250514".into());

        Self { aliases, providers }
    }

    /// Resolve a model name or alias to a provider + model definition.
    pub fn resolve(&self, name: &str) -> Result<ResolvedModel> {
        // Follow alias chains with a small hop budget.
        let mut current = name.to_string();
        for _ in 0..5 {
            match self.aliases.get(&current) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }

        // provider/model form.
        if let Some((provider_id, model_id)) = current.split_once('/') {
            let def = self.providers.get(provider_id).ok_or_else(|| {
                Error::ConfigInvalid(format!("unknown provider '{provider_id}'"))
            })?;
            return Ok(self.resolved(provider_id, def, model_id));
        }

        // Owning-provider lookup.
        for (provider_id, def) in &self.providers {
            if def.models.iter().any(|m| m.id == current) {
                return Ok(self.resolved(provider_id, def, &current));
            }
        }

        // Prefix pattern match.
        let provider_id = if current.starts_with("claude-") {
            "anthropic"
        } else if current.starts_with("gpt-") || current.starts_with('o') {
            "openai"
        } else if current.starts_with("gemini-") {
            "google"
        } else {
            return Err(Error::ConfigInvalid(format!(
                "cannot resolve model '{current}' to a provider"
            )));
        };
        let def = self.providers.get(provider_id).ok_or_else(|| {
            Error::ConfigInvalid(format!(
                "model '{current}' matches provider '{provider_id}' which is not configured"
            ))
        })?;
        Ok(self.resolved(provider_id, def, &current))
    }

    fn resolved(&self, provider_id: &str, def: &ProviderDef, model_id: &str) -> ResolvedModel {
        let model = def
            .models
            .iter()
            .find(|m| m.id == model_id)
            .cloned()
            .unwrap_or_else(|| ModelDef {
                id: model_id.to_string(),
                max_tokens: d_max_tokens(),
                context_window: d_context_window(),
                capabilities: ModelCapabilities::default(),
            });

        // Base URL override env var applies last.
        let override_var = format!(
            "BASHCLAW_{}_BASE_URL",
            provider_id.to_uppercase().replace('-', "_")
        );
        let base_url = std::env::var(&override_var).unwrap_or_else(|_| def.base_url.clone());

        ResolvedModel {
            provider_id: provider_id.to_string(),
            api: def.api,
            base_url,
            api_key_env: def.api_key_env.clone(),
            model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolves_through_ref() {
        let catalog = ModelCatalog::builtin();
        let resolved = catalog.resolve("default").unwrap();
        assert_eq!(resolved.provider_id, "anthropic");
        assert_eq!(resolved.model.id, "claude-sonnet-4-20250514");
        assert_eq!(resolved.api, ApiShape::Anthropic);
    }

    #[test]
    fn slash_form_picks_provider() {
        let catalog = ModelCatalog::builtin();
        let resolved = catalog.resolve("openai/gpt-4o").unwrap();
        assert_eq!(resolved.provider_id, "openai");
        assert_eq!(resolved.model.id, "gpt-4o");
        assert_eq!(resolved.model.context_window, 128_000);
    }

    #[test]
    fn bare_model_id_finds_owner() {
        let catalog = ModelCatalog::builtin();
        let resolved = catalog.resolve("gemini-2.0-flash").unwrap();
        assert_eq!(resolved.provider_id, "google");
    }

    #[test]
    fn prefix_match_covers_unlisted_models() {
        let catalog = ModelCatalog::builtin();
        let resolved = catalog.resolve("claude-opus-4-20250514").unwrap();
        assert_eq!(resolved.provider_id, "anthropic");
        // Unlisted model gets default limits.
        assert_eq!(resolved.model.max_tokens, 8192);
    }

    #[test]
    fn unresolvable_model_errors() {
        let catalog = ModelCatalog::builtin();
        assert!(catalog.resolve("llama-3").is_err());
    }

    #[test]
    fn base_url_override_env_applies() {
        std::env::set_var("BASHCLAW_OPENAI_BASE_URL", "http://localhost:9999/v1");
        let catalog = ModelCatalog::builtin();
        let resolved = catalog.resolve("openai/gpt-4o").unwrap();
        assert_eq!(resolved.base_url, "http://localhost:9999/v1");
        std::env::remove_var("BASHCLAW_OPENAI_BASE_URL");
    }

    #[test]
    fn load_missing_file_uses_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ModelCatalog::load(&dir.path().join("models.json")).unwrap();
        assert!(catalog.providers.contains_key("anthropic"));
    }
}
