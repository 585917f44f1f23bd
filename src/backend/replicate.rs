//! Replicate backend
//!
//! Predictions are created asynchronously and then polled until they reach a
//! terminal state, via [`JobPoller`](crate::queue::poller::JobPoller).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::backend::http::{AdapterContext, AdapterOptions, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, GeneratedImage, GenerationMode, GenerationRequest, ImageBackend,
    ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::Result;
use crate::queue::poller::{AsyncJob, JobPoller, JobSnapshot, JobSource, JobStatus};
use crate::response::{base64, sniff_media_type};

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::Replicate,
    name: "Replicate",
    description: "Access to Flux, SDXL, and advanced image editing models",
    supported_modes: &[
        GenerationMode::TextToImage,
        GenerationMode::ImageToImage,
        GenerationMode::Inpainting,
        GenerationMode::Outpainting,
    ],
    models: &[
        ModelInfo {
            id: "black-forest-labs/flux-schnell",
            name: "Flux Schnell",
            capabilities: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 5,
            cost_per_image: Some(0.003),
        },
        ModelInfo {
            id: "black-forest-labs/flux-dev",
            name: "Flux Dev",
            capabilities: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 20,
            cost_per_image: Some(0.025),
        },
        ModelInfo {
            id: "black-forest-labs/flux-fill-pro",
            name: "Flux Fill Pro",
            capabilities: &[
                GenerationMode::ImageToImage,
                GenerationMode::Inpainting,
                GenerationMode::Outpainting,
            ],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 15,
            cost_per_image: Some(0.02),
        },
        ModelInfo {
            id: "black-forest-labs/flux-dev-inpainting",
            name: "Flux Dev Inpainting",
            capabilities: &[GenerationMode::ImageToImage, GenerationMode::Inpainting],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 25,
            cost_per_image: Some(0.035),
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(60, 1)),
    requires_api_key: true,
};

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Prediction {
    fn job_status(&self) -> JobStatus {
        match self.status.as_str() {
            "succeeded" => JobStatus::Succeeded,
            "failed" | "canceled" => JobStatus::Failed,
            "processing" => JobStatus::Running,
            _ => JobStatus::Pending,
        }
    }

    /// Output is either a single URL or a list of them
    fn output_urls(&self) -> Vec<String> {
        match &self.output {
            Some(Value::String(url)) => vec![url.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        match &self.error {
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }
}

fn data_url(bytes: &[u8]) -> String {
    base64::create_data_url(bytes, sniff_media_type(bytes).unwrap_or("image/png"))
}

fn is_fill_model(model: &str) -> bool {
    model.contains("inpainting") || model.contains("fill")
}

/// Model input for the effective mode. Models that cannot fill masked
/// regions fall back to plain image-to-image.
fn build_input(request: &GenerationRequest, mode: GenerationMode, prompt: String) -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("output_format".into(), json!("png"));
    input.insert("prompt".into(), json!(prompt));

    let source = request.source_image.as_deref().map(data_url);
    let mask = request.mask_image.as_deref().map(data_url);

    match (mode, source) {
        (GenerationMode::Inpainting | GenerationMode::Outpainting, Some(image)) if is_fill_model(&request.model) => {
            input.insert("image".into(), json!(image));
            input.insert("strength".into(), json!(request.strength.unwrap_or(0.8)));
            if request.model.contains("fill-pro") {
                let mask_prompt = if mask.is_some() { "user mask" } else { "subject" };
                input.insert("mask_prompt".into(), json!(mask_prompt));
            }
            if let Some(mask) = mask {
                input.insert("mask".into(), json!(mask));
            }
        }
        (GenerationMode::ImageToImage | GenerationMode::Inpainting | GenerationMode::Outpainting, Some(image)) => {
            input.insert("image".into(), json!(image));
            input.insert(
                "image_to_image_strength".into(),
                json!(request.strength.unwrap_or(0.75)),
            );
        }
        _ => {
            if request.model.contains("flux-schnell") {
                input.insert("go_fast".into(), json!(true));
                input.insert("num_inference_steps".into(), json!(4));
            } else if request.model.contains("flux-dev") {
                input.insert("num_inference_steps".into(), json!(request.steps.unwrap_or(28)));
            }
            input.insert(
                "aspect_ratio".into(),
                json!(request.aspect_ratio.as_deref().unwrap_or("1:1")),
            );
        }
    }

    if let Some(seed) = request.seed {
        input.insert("seed".into(), json!(seed));
    }
    input
}

pub struct ReplicateBackend {
    client: VendorClient,
    poller: JobPoller,
}

impl ReplicateBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::Replicate, DEFAULT_BASE_URL, options, context)?,
            poller: context.poller,
        })
    }

    async fn predict(&self, request: &GenerationRequest, mode: GenerationMode) -> Result<Vec<GeneratedImage>> {
        let input = build_input(request, mode, self.client.enhance_prompt(request));
        let path = format!("models/{}/predictions", request.model);

        let response = self
            .client
            .send(self.client.post_bearer(&path)?.json(&json!({ "input": input })))
            .await?;
        let prediction: Prediction = response.json().await?;
        debug!(prediction_id = %prediction.id, status = %prediction.status, "Prediction created");

        let urls = self
            .poller
            .wait(AsyncJob::new(prediction.id, BackendId::Replicate), self)
            .await?;

        let size = request.size(&DESCRIPTOR);
        Ok(urls.into_iter().map(|url| GeneratedImage::from_url(url, size)).collect())
    }
}

#[async_trait]
impl JobSource for ReplicateBackend {
    type Output = Vec<String>;

    async fn poll(&self, job_id: &str) -> Result<JobSnapshot<Vec<String>>> {
        let builder = self
            .client
            .http()
            .get(self.client.endpoint(&format!("predictions/{}", job_id)))
            .bearer_auth(self.client.api_key()?);
        let prediction: Prediction = self.client.send(builder).await?.json().await?;

        Ok(match prediction.job_status() {
            JobStatus::Succeeded => JobSnapshot::succeeded(prediction.output_urls()),
            JobStatus::Failed => JobSnapshot::failed(
                prediction
                    .error_message()
                    .unwrap_or_else(|| format!("Prediction {}", prediction.status)),
            ),
            status => JobSnapshot::in_progress(status),
        })
    }
}

#[async_trait]
impl ImageBackend for ReplicateBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &DESCRIPTOR
    }

    fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    async fn validate_api_key(&self, api_key: &str) -> Result<bool> {
        let request = self
            .client
            .http()
            .get(self.client.endpoint("account"))
            .bearer_auth(api_key);
        Ok(self.client.check_key(request).await)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.predict(request, request.mode).await
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        request.require_source_image("image-to-image")?;
        self.predict(request, GenerationMode::ImageToImage).await
    }

    async fn inpaint(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        request.require_source_image("inpainting")?;
        self.predict(request, GenerationMode::Inpainting).await
    }
}
