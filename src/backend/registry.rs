//! Backend registry: adapters, their rate limit policies, and shared credentials

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::clipdrop::ClipdropBackend;
use crate::backend::credentials::CredentialStore;
use crate::backend::deepai::DeepAiBackend;
use crate::backend::gemini::GeminiBackend;
use crate::backend::http::{AdapterContext, AdapterOptions};
use crate::backend::huggingface::HuggingFaceBackend;
use crate::backend::openai::OpenAiBackend;
use crate::backend::removebg::RemoveBgBackend;
use crate::backend::replicate::ReplicateBackend;
use crate::backend::stability::StabilityBackend;
use crate::backend::styles::StyleCatalog;
use crate::backend::together::TogetherBackend;
use crate::backend::traits::{BackendDescriptor, BackendId, ImageBackend, RateLimitPolicy};
use crate::config::Settings;
use crate::error::{AppError, Result};

struct RegisteredBackend {
    adapter: Arc<dyn ImageBackend>,
    rate_limit: Option<RateLimitPolicy>,
}

/// What the API reports for each backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendSummary {
    #[serde(flatten)]
    pub descriptor: BackendDescriptor,
    pub configured: bool,
    pub effective_rate_limit: Option<RateLimitPolicy>,
}

/// Registry of available backends.
///
/// The set of backends is fixed once built; credentials can change at any time.
pub struct BackendRegistry {
    backends: BTreeMap<BackendId, RegisteredBackend>,
    credentials: Arc<CredentialStore>,
}

impl BackendRegistry {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            backends: BTreeMap::new(),
            credentials,
        }
    }

    /// Build every enabled backend from settings, loading API keys from
    /// settings or the environment.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let credentials = Arc::new(CredentialStore::new());
        let context = AdapterContext::new(credentials.clone())
            .with_styles(StyleCatalog::new(settings.prompt.base_enhancement.clone()))
            .with_poller(settings.poller.to_poller());

        let mut registry = Self::new(credentials);
        for id in BackendId::ALL {
            let backend = settings.backend(id);
            if !backend.enabled {
                debug!(backend = %id, "Backend disabled by configuration");
                continue;
            }

            let adapter = build_adapter(id, &backend.adapter_options(), &context)?;
            let policy = backend.rate_limit.or(adapter.descriptor().rate_limit);
            registry.register_with_policy(adapter, policy);

            if let Some(key) = backend.resolve_api_key() {
                registry.credentials.set(id, key, backend.trust_api_key);
            }
        }

        info!(
            registered = registry.backends.len(),
            configured = registry.configured().count(),
            "Backend registry initialized"
        );
        Ok(registry)
    }

    /// Register an adapter with the rate limit it declares
    pub fn register(&mut self, adapter: Arc<dyn ImageBackend>) {
        let policy = adapter.descriptor().rate_limit;
        self.register_with_policy(adapter, policy);
    }

    /// Register an adapter with an explicit rate limit (`None` for unlimited)
    pub fn register_with_policy(&mut self, adapter: Arc<dyn ImageBackend>, rate_limit: Option<RateLimitPolicy>) {
        let id = adapter.id();
        if self.backends.contains_key(&id) {
            warn!(backend = %id, "Replacing an already registered backend");
        }
        self.backends.insert(id, RegisteredBackend { adapter, rate_limit });
    }

    pub fn get(&self, id: BackendId) -> Option<Arc<dyn ImageBackend>> {
        self.backends.get(&id).map(|b| b.adapter.clone())
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ImageBackend>> {
        self.backends.values().map(|b| &b.adapter)
    }

    pub fn configured(&self) -> impl Iterator<Item = &Arc<dyn ImageBackend>> {
        self.all().filter(|b| b.is_configured())
    }

    /// Effective policies, for building the rate limiter
    pub fn rate_limit_policies(&self) -> Vec<(BackendId, RateLimitPolicy)> {
        self.backends
            .iter()
            .filter_map(|(id, b)| b.rate_limit.map(|p| (*id, p)))
            .collect()
    }

    pub fn rate_limit_policy(&self, id: BackendId) -> Option<RateLimitPolicy> {
        self.backends.get(&id).and_then(|b| b.rate_limit)
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn summaries(&self) -> Vec<BackendSummary> {
        self.backends
            .values()
            .map(|b| BackendSummary {
                descriptor: b.adapter.descriptor().clone(),
                configured: b.adapter.is_configured(),
                effective_rate_limit: b.rate_limit,
            })
            .collect()
    }

    /// Store an API key. Untrusted keys are checked with the vendor first and
    /// rejected with `AuthenticationFailed` when the vendor refuses them.
    pub async fn set_credential(&self, id: BackendId, api_key: &str, trusted: bool) -> Result<()> {
        let adapter = self.get(id).ok_or(AppError::BackendNotRegistered(id))?;

        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(AppError::InvalidRequest("API key cannot be empty".to_string()));
        }

        if !trusted && !adapter.validate_api_key(api_key).await? {
            warn!(backend = %id, "Vendor rejected the API key");
            return Err(AppError::AuthenticationFailed(format!("{} rejected the API key", id)));
        }

        self.credentials.set(id, api_key, trusted);
        info!(backend = %id, trusted, "API key stored");
        Ok(())
    }

    /// Drop the stored key; returns whether one was present
    pub fn remove_credential(&self, id: BackendId) -> bool {
        let removed = self.credentials.remove(id).is_some();
        if removed {
            info!(backend = %id, "API key removed");
        }
        removed
    }
}

fn build_adapter(id: BackendId, options: &AdapterOptions, context: &AdapterContext) -> Result<Arc<dyn ImageBackend>> {
    let adapter: Arc<dyn ImageBackend> = match id {
        BackendId::GoogleGemini => Arc::new(GeminiBackend::new(options, context)?),
        BackendId::OpenAiDalle => Arc::new(OpenAiBackend::new(options, context)?),
        BackendId::StabilityAi => Arc::new(StabilityBackend::new(options, context)?),
        BackendId::Replicate => Arc::new(ReplicateBackend::new(options, context)?),
        BackendId::TogetherAi => Arc::new(TogetherBackend::new(options, context)?),
        BackendId::RemoveBg => Arc::new(RemoveBgBackend::new(options, context)?),
        BackendId::Clipdrop => Arc::new(ClipdropBackend::new(options, context)?),
        BackendId::HuggingFace => Arc::new(HuggingFaceBackend::new(options, context)?),
        BackendId::DeepAi => Arc::new(DeepAiBackend::new(options, context)?),
    };
    Ok(adapter)
}
