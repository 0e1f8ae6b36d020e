//! Provider registry: resolves model names through the catalog and caches
//! one HTTP client per provider id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use bc_domain::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::catalog::{ApiShape, ModelCatalog, ResolvedModel};
use crate::google::GoogleProvider;
use crate::openai::OpenAiProvider;
use crate::traits::Provider;

pub struct ProviderRegistry {
    catalog: ModelCatalog,
    clients: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            catalog,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Resolve a model name to an adapter plus its catalog entry.
    pub fn resolve(&self, model_name: &str) -> Result<(Arc<dyn Provider>, ResolvedModel)> {
        let resolved = self.catalog.resolve(model_name)?;

        if let Some(client) = self.clients.read().get(&resolved.provider_id) {
            return Ok((client.clone(), resolved));
        }

        let api_key = std::env::var(&resolved.api_key_env).map_err(|_| {
            Error::ConfigInvalid(format!(
                "provider '{}' requires env var {} to be set",
                resolved.provider_id, resolved.api_key_env
            ))
        })?;

        let client: Arc<dyn Provider> = match resolved.api {
            ApiShape::Anthropic => Arc::new(AnthropicProvider::new(
                &resolved.provider_id,
                &resolved.base_url,
                &api_key,
            )?),
            ApiShape::Openai => Arc::new(OpenAiProvider::new(
                &resolved.provider_id,
                &resolved.base_url,
                &api_key,
            )?),
            ApiShape::Google => Arc::new(GoogleProvider::new(
                &resolved.provider_id,
                &resolved.base_url,
                &api_key,
            )?),
        };

        self.clients
            .write()
            .insert(resolved.provider_id.clone(), client.clone());
        Ok((client, resolved))
    }

    /// Install a pre-built client for a provider id (used by tests to
    /// substitute the mock provider).
    pub fn install(&self, provider_id: &str, client: Arc<dyn Provider>) {
        self.clients.write().insert(provider_id.to_string(), client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn missing_api_key_is_config_error() {
        std::env::remove_var("BC_TEST_NO_SUCH_KEY");
        let mut catalog = ModelCatalog::builtin();
        catalog
            .providers
            .get_mut("anthropic")
            .unwrap()
            .api_key_env = "BC_TEST_NO_SUCH_KEY".into();
        let registry = ProviderRegistry::new(catalog);
        let err = registry.resolve("default").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn installed_client_bypasses_key_lookup() {
        let registry = ProviderRegistry::new(ModelCatalog::builtin());
        registry.install("anthropic", Arc::new(MockProvider::new("anthropic")));
        let (client, resolved) = registry.resolve("default").unwrap();
        assert_eq!(client.id(), "anthropic");
        assert_eq!(resolved.model.id, "claude-sonnet-4-20250514");
    }
}
