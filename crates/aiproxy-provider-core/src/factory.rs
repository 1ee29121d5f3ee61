use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use aiproxy_protocol::openai::{Model, ModelObjectType};

use crate::errors::{ProviderError, ProviderResult};
use crate::provider::{ModelInfo, Provider, ProviderType};

/// Stable `created` stamp for the OpenAI models surface; clients treat it as
/// an opaque epoch and diff listings, so it must not move between calls.
const MODEL_CREATED_AT: i64 = 1_708_387_200;

#[derive(Default)]
struct FactoryState {
    order: Vec<ProviderType>,
    providers: HashMap<ProviderType, Arc<dyn Provider>>,
    /// model id → providers claiming support, in registration order, no
    /// duplicates per key.
    models: HashMap<String, Vec<ProviderType>>,
    /// model id → provider that most recently completed a request for it.
    last_success: HashMap<String, ProviderType>,
}

/// Registry of providers plus the model→providers index used for routing.
/// Read-mostly; all mutation takes the write lock.
#[derive(Default)]
pub struct ProviderFactory {
    state: RwLock<FactoryState>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn Provider>) {
        let mut state = self.state.write().expect("factory lock poisoned");
        let name = provider.name();
        if !state.providers.contains_key(&name) {
            state.order.push(name);
        }
        state.providers.insert(name, provider);
    }

    pub fn get(&self, provider: ProviderType) -> Option<Arc<dyn Provider>> {
        let state = self.state.read().expect("factory lock poisoned");
        state.providers.get(&provider).cloned()
    }

    pub fn provider_types(&self) -> Vec<ProviderType> {
        let state = self.state.read().expect("factory lock poisoned");
        state.order.clone()
    }

    /// Routing policy: sole candidate wins; otherwise the last-success
    /// provider if still a candidate; otherwise the first candidate.
    pub fn get_by_model(&self, model: &str) -> ProviderResult<Arc<dyn Provider>> {
        let state = self.state.read().expect("factory lock poisoned");
        let candidates = state
            .models
            .get(model)
            .filter(|candidates| !candidates.is_empty())
            .ok_or_else(|| ProviderError::NoProvider(model.to_string()))?;

        let chosen = if candidates.len() == 1 {
            candidates[0]
        } else {
            match state.last_success.get(model) {
                Some(last) if candidates.contains(last) => *last,
                _ => candidates[0],
            }
        };
        state
            .providers
            .get(&chosen)
            .cloned()
            .ok_or_else(|| ProviderError::NoProvider(model.to_string()))
    }

    /// First candidate whose type differs from `exclude`.
    pub fn get_alternative(
        &self,
        model: &str,
        exclude: ProviderType,
    ) -> ProviderResult<Arc<dyn Provider>> {
        let state = self.state.read().expect("factory lock poisoned");
        let candidates = state
            .models
            .get(model)
            .ok_or_else(|| ProviderError::NoProvider(model.to_string()))?;
        let alternative = candidates
            .iter()
            .find(|candidate| **candidate != exclude)
            .ok_or_else(|| ProviderError::NoProvider(model.to_string()))?;
        state
            .providers
            .get(alternative)
            .cloned()
            .ok_or_else(|| ProviderError::NoProvider(model.to_string()))
    }

    pub fn record_success(&self, model: &str, provider: ProviderType) {
        let mut state = self.state.write().expect("factory lock poisoned");
        state.last_success.insert(model.to_string(), provider);
    }

    pub fn get_last_success(&self, model: &str) -> Option<ProviderType> {
        let state = self.state.read().expect("factory lock poisoned");
        state.last_success.get(model).copied()
    }

    /// Build the model→providers index by asking every registered provider
    /// for its models. Individual provider failures are logged and skipped.
    pub async fn populate(&self) {
        let providers: Vec<Arc<dyn Provider>> = {
            let state = self.state.read().expect("factory lock poisoned");
            state
                .order
                .iter()
                .filter_map(|name| state.providers.get(name).cloned())
                .collect()
        };

        let mut listings: Vec<(ProviderType, Vec<ModelInfo>)> = Vec::new();
        for provider in providers {
            let name = provider.name();
            if let Err(err) = provider.initialize().await {
                warn!(provider = %name, error = %err, "provider initialize failed");
            }
            match provider.list_models().await {
                Ok(models) => {
                    info!(provider = %name, count = models.len(), "indexed provider models");
                    listings.push((name, models));
                }
                Err(err) => {
                    warn!(provider = %name, error = %err, "list_models failed; provider skipped");
                }
            }
        }

        let mut state = self.state.write().expect("factory lock poisoned");
        state.models.clear();
        for (name, models) in listings {
            for model in models {
                let entry = state.models.entry(model.id).or_default();
                if !entry.contains(&name) {
                    entry.push(name);
                }
            }
        }
    }

    /// Rebuild the index entries contributed by one provider.
    pub async fn refresh(&self, provider_type: ProviderType) -> ProviderResult<()> {
        let provider = self
            .get(provider_type)
            .ok_or_else(|| ProviderError::NoProvider(provider_type.to_string()))?;
        let models = provider.list_models().await?;

        let mut state = self.state.write().expect("factory lock poisoned");
        state.models.retain(|_, candidates| {
            candidates.retain(|candidate| *candidate != provider_type);
            !candidates.is_empty()
        });
        for model in models {
            let entry = state.models.entry(model.id).or_default();
            if !entry.contains(&provider_type) {
                entry.push(provider_type);
            }
        }
        Ok(())
    }

    pub fn get_all_models(&self) -> HashMap<String, Vec<ProviderType>> {
        let state = self.state.read().expect("factory lock poisoned");
        state.models.clone()
    }
}

/// Shape a provider's model listing for the OpenAI `/v1/models` surface.
pub fn format_openai_models(data: &[ModelInfo], provider: ProviderType) -> Vec<Model> {
    data.iter()
        .map(|model| Model {
            id: model.id.clone(),
            object: ModelObjectType::Model,
            created: MODEL_CREATED_AT,
            owned_by: provider.owner_name().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::provider::ByteStream;
    use aiproxy_protocol::Proto;
    use aiproxy_transform::{NativeRequest, NativeResponse};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct StubAuthenticator(ProviderType);

    #[async_trait]
    impl Authenticator for StubAuthenticator {
        fn provider(&self) -> ProviderType {
            self.0
        }
        fn credentials_path(&self) -> PathBuf {
            PathBuf::from("/dev/null")
        }
        async fn authenticate(&self) -> ProviderResult<()> {
            Ok(())
        }
        async fn get_token(&self) -> ProviderResult<String> {
            Ok("stub".to_string())
        }
        async fn force_refresh(&self) -> ProviderResult<String> {
            Ok("stub".to_string())
        }
        fn is_authenticated(&self) -> bool {
            true
        }
        fn clear(&self) -> ProviderResult<()> {
            Ok(())
        }
    }

    struct StubProvider {
        name: ProviderType,
        models: Vec<&'static str>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> ProviderType {
            self.name
        }
        fn protocol(&self) -> Proto {
            Proto::OpenAI
        }
        fn supported_models(&self) -> Vec<String> {
            self.models.iter().map(|m| m.to_string()).collect()
        }
        fn authenticator(&self) -> Arc<dyn Authenticator> {
            Arc::new(StubAuthenticator(self.name))
        }
        async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
            Ok(self.models.iter().map(|m| ModelInfo::new(*m)).collect())
        }
        async fn generate_content(
            &self,
            _model: &str,
            _request: &NativeRequest,
        ) -> ProviderResult<NativeResponse> {
            Err(ProviderError::Other("not used".to_string()))
        }
        async fn generate_content_stream(
            &self,
            _model: &str,
            _request: &NativeRequest,
        ) -> ProviderResult<ByteStream> {
            Err(ProviderError::Other("not used".to_string()))
        }
    }

    fn factory_with_two_claimants() -> ProviderFactory {
        let factory = ProviderFactory::new();
        factory.register(Arc::new(StubProvider {
            name: ProviderType::Antigravity,
            models: vec!["claude-sonnet-4-5", "gemini-3-pro"],
        }));
        factory.register(Arc::new(StubProvider {
            name: ProviderType::Kiro,
            models: vec!["claude-sonnet-4-5"],
        }));
        factory
    }

    #[tokio::test]
    async fn routing_is_deterministic_by_registration_order() {
        let factory = factory_with_two_claimants();
        factory.populate().await;
        let provider = factory.get_by_model("claude-sonnet-4-5").expect("routes");
        assert_eq!(provider.name(), ProviderType::Antigravity);
        let sole = factory.get_by_model("gemini-3-pro").expect("routes");
        assert_eq!(sole.name(), ProviderType::Antigravity);
    }

    #[tokio::test]
    async fn last_success_breaks_ties_while_still_a_candidate() {
        let factory = factory_with_two_claimants();
        factory.populate().await;
        factory.record_success("claude-sonnet-4-5", ProviderType::Kiro);
        let provider = factory.get_by_model("claude-sonnet-4-5").expect("routes");
        assert_eq!(provider.name(), ProviderType::Kiro);

        // A recorded provider that left the candidate set falls back to the
        // first candidate.
        factory.record_success("gemini-3-pro", ProviderType::Kiro);
        let provider = factory.get_by_model("gemini-3-pro").expect("routes");
        assert_eq!(provider.name(), ProviderType::Antigravity);
    }

    #[tokio::test]
    async fn alternative_skips_the_excluded_provider() {
        let factory = factory_with_two_claimants();
        factory.populate().await;
        let alt = factory
            .get_alternative("claude-sonnet-4-5", ProviderType::Antigravity)
            .expect("alternative exists");
        assert_eq!(alt.name(), ProviderType::Kiro);
        assert!(
            factory
                .get_alternative("gemini-3-pro", ProviderType::Antigravity)
                .is_err()
        );
    }

    #[tokio::test]
    async fn unknown_model_fails_with_no_provider() {
        let factory = factory_with_two_claimants();
        factory.populate().await;
        match factory.get_by_model("missing-model") {
            Err(ProviderError::NoProvider(model)) => assert_eq!(model, "missing-model"),
            Ok(provider) => panic!("unexpected routing result: Ok({:?})", provider.name()),
            Err(other) => panic!("unexpected routing result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_rebuilds_only_one_providers_entries() {
        let factory = factory_with_two_claimants();
        factory.populate().await;
        factory
            .refresh(ProviderType::Kiro)
            .await
            .expect("refresh succeeds");
        let index = factory.get_all_models();
        assert!(index["claude-sonnet-4-5"].contains(&ProviderType::Kiro));
        assert!(index["claude-sonnet-4-5"].contains(&ProviderType::Antigravity));
    }

    #[test]
    fn formatted_models_report_gemini_cli_as_gemini() {
        let models = format_openai_models(
            &[ModelInfo::new("gemini-2.5-pro")],
            ProviderType::GeminiCli,
        );
        assert_eq!(models[0].owned_by, "gemini");
        assert_eq!(models[0].created, MODEL_CREATED_AT);
    }
}
