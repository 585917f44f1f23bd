//! Shared HTTP plumbing for vendor adapters

use reqwest::multipart::Part;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::backend::credentials::CredentialStore;
use crate::backend::styles::StyleCatalog;
use crate::backend::traits::{BackendId, GenerationRequest};
use crate::error::{AppError, Result};
use crate::queue::poller::JobPoller;
use crate::response::{extension_for, sniff_media_type};

/// Collaborators every adapter is built with
#[derive(Clone)]
pub struct AdapterContext {
    pub credentials: Arc<CredentialStore>,
    pub styles: Arc<StyleCatalog>,
    pub poller: JobPoller,
}

impl AdapterContext {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            styles: Arc::new(StyleCatalog::default()),
            poller: JobPoller::default(),
        }
    }

    pub fn with_styles(mut self, styles: StyleCatalog) -> Self {
        self.styles = Arc::new(styles);
        self
    }

    pub fn with_poller(mut self, poller: JobPoller) -> Self {
        self.poller = poller;
        self
    }
}

/// Per-backend connection options
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// HTTP client bound to one vendor: base URL, credential lookup and error mapping
pub struct VendorClient {
    backend: BackendId,
    client: Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
    styles: Arc<StyleCatalog>,
}

impl VendorClient {
    pub fn new(
        backend: BackendId,
        default_base_url: &str,
        options: &AdapterOptions,
        context: &AdapterContext,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = options
            .base_url
            .as_deref()
            .unwrap_or(default_base_url)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            backend,
            client,
            base_url,
            credentials: context.credentials.clone(),
            styles: context.styles.clone(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.contains(self.backend)
    }

    /// Stored API key, or `NotConfigured`
    pub fn api_key(&self) -> Result<String> {
        self.credentials
            .api_key(self.backend)
            .ok_or(AppError::NotConfigured(self.backend))
    }

    /// POST with `Authorization: Bearer <key>`
    pub fn post_bearer(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.post(self.endpoint(path)).bearer_auth(self.api_key()?))
    }

    pub fn enhance_prompt(&self, request: &GenerationRequest) -> String {
        self.styles.enhance(&request.prompt, request.style.as_deref())
    }

    /// Send and turn any non-2xx answer into `AppError::Api`
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&body);
        debug!(backend = %self.backend, status = %status, code = ?code, "Vendor returned an error");

        Err(AppError::Api {
            backend: self.backend,
            status: status.as_u16(),
            code,
            message: message.unwrap_or_else(|| {
                status.canonical_reason().unwrap_or("request failed").to_string()
            }),
        })
    }

    /// Send a key-check request; only a 2xx answer confirms the key
    pub async fn check_key(&self, request: RequestBuilder) -> bool {
        self.check_key_with(request, KeyCheck::SuccessOnly).await
    }

    /// Send a key-check request and judge the status with `rule`
    pub async fn check_key_with(&self, request: RequestBuilder, rule: KeyCheck) -> bool {
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let accepted = rule.accepts(status);
                if !accepted {
                    debug!(backend = %self.backend, status = %status, "Credential check rejected");
                }
                accepted
            }
            Err(e) => {
                debug!(backend = %self.backend, error = %e, "Credential check failed");
                false
            }
        }
    }
}

/// How a key-check response status is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    /// Any 2xx
    SuccessOnly,
    /// Anything except 401/403. For vendors whose only check is a
    /// deliberately malformed call that fails validation for good keys.
    NotUnauthorized,
}

impl KeyCheck {
    pub fn accepts(self, status: StatusCode) -> bool {
        match self {
            KeyCheck::SuccessOnly => status.is_success(),
            KeyCheck::NotUnauthorized => {
                status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN
            }
        }
    }
}

/// Multipart file part with a sniffed media type
pub fn image_part(data: &[u8], name: &str) -> Result<Part> {
    let media_type = sniff_media_type(data).unwrap_or("image/png");
    let part = Part::bytes(data.to_vec())
        .file_name(format!("{}.{}", name, extension_for(media_type)))
        .mime_str(media_type)?;
    Ok(part)
}

/// Pull a vendor error code and message out of a JSON error body.
///
/// Understands the common layouts: `{"error": {"code", "type", "message"}}`,
/// `{"errors": [{"code", "title"}]}`, `{"name", "message"}` and
/// `{"detail": "..."}`. Non-JSON bodies become the message verbatim.
pub fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        let text = body.trim();
        return (None, (!text.is_empty()).then(|| text.chars().take(500).collect()));
    };

    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_owned);

    let nested = json
        .get("error")
        .filter(|e| e.is_object())
        .or_else(|| json.get("errors").and_then(|e| e.get(0)));

    let code = nested
        .and_then(|e| text(e.get("code")).or_else(|| text(e.get("type"))).or_else(|| text(e.get("status"))))
        .or_else(|| text(json.get("code")))
        .or_else(|| text(json.get("name")));

    let message = nested
        .and_then(|e| {
            text(e.get("message"))
                .or_else(|| text(e.get("title")))
                .or_else(|| text(e.get("detail")))
        })
        .or_else(|| text(json.get("message")))
        .or_else(|| text(json.get("detail")))
        .or_else(|| text(json.get("error")));

    (code, message)
}
