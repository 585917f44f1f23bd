//! DeepAI backend: background removal and single-purpose image filters

use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;

use crate::backend::http::{image_part, AdapterContext, AdapterOptions, KeyCheck, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, Capability, GeneratedImage, GenerationMode, GenerationRequest,
    ImageBackend, ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::{AppError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.deepai.org/api";

const API_KEY_HEADER: &str = "api-key";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::DeepAi,
    name: "DeepAI",
    description: "Fast image processing: background removal, super resolution, colorization",
    supported_modes: &[GenerationMode::BackgroundRemoval, GenerationMode::ImageToImage],
    models: &[
        ModelInfo {
            id: "remove-bg",
            name: "Remove Background",
            capabilities: &[GenerationMode::BackgroundRemoval],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 5,
            cost_per_image: Some(0.0),
        },
        ModelInfo {
            id: "super-resolution",
            name: "Super Resolution",
            capabilities: &[GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 8,
            cost_per_image: Some(0.0),
        },
        ModelInfo {
            id: "colorize",
            name: "Colorization",
            capabilities: &[GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 6,
            cost_per_image: Some(0.0),
        },
        ModelInfo {
            id: "face-enhancement",
            name: "Face Enhancement",
            capabilities: &[GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 7,
            cost_per_image: Some(0.0),
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(30, 1)),
    requires_api_key: true,
};

#[derive(Debug, Deserialize)]
struct FilterResponse {
    #[serde(default)]
    output_url: Option<String>,
}

fn endpoint_for(model: &str) -> Result<&'static str> {
    match model {
        "super-resolution" => Ok("torch-srgan"),
        "colorize" => Ok("colorizer"),
        "face-enhancement" => Ok("enhance"),
        other => Err(AppError::InvalidRequest(format!(
            "DeepAI has no image-to-image model '{}'",
            other
        ))),
    }
}

pub struct DeepAiBackend {
    client: VendorClient,
}

impl DeepAiBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::DeepAi, DEFAULT_BASE_URL, options, context)?,
        })
    }

    async fn apply(&self, request: &GenerationRequest, endpoint: &str, purpose: &str) -> Result<Vec<GeneratedImage>> {
        let source = request.require_source_image(purpose)?;
        let form = Form::new().part("image", image_part(source, "image")?);

        let builder = self
            .client
            .http()
            .post(self.client.endpoint(endpoint))
            .header(API_KEY_HEADER, self.client.api_key()?)
            .multipart(form);
        let parsed: FilterResponse = self.client.send(builder).await?.json().await?;

        let url = parsed
            .output_url
            .ok_or_else(|| AppError::Backend("No output URL returned from DeepAI".to_string()))?;
        Ok(vec![GeneratedImage::from_url(url, request.size(&DESCRIPTOR))])
    }
}

#[async_trait]
impl ImageBackend for DeepAiBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &DESCRIPTOR
    }

    fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    /// An empty filter call fails input validation for good keys and 401 for bad ones
    async fn validate_api_key(&self, api_key: &str) -> Result<bool> {
        let request = self
            .client
            .http()
            .post(self.client.endpoint("torch-srgan"))
            .header(API_KEY_HEADER, api_key)
            .multipart(Form::new());
        Ok(self.client.check_key_with(request, KeyCheck::NotUnauthorized).await)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        match request.mode {
            GenerationMode::BackgroundRemoval => self.remove_background(request).await,
            GenerationMode::ImageToImage => self.edit_image(request).await,
            mode => Err(AppError::CapabilityUnsupported {
                backend: BackendId::DeepAi,
                capability: Capability::for_mode(mode),
            }),
        }
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let endpoint = endpoint_for(&request.model)?;
        self.apply(request, endpoint, "image processing").await
    }

    async fn remove_background(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.apply(request, "remove-bg", "background removal").await
    }
}
