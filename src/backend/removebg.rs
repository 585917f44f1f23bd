//! remove.bg backend: background removal only

use async_trait::async_trait;
use reqwest::multipart::Form;

use crate::backend::http::{image_part, AdapterContext, AdapterOptions, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, Capability, GeneratedImage, GenerationMode, GenerationRequest,
    ImageBackend, ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::{AppError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.remove.bg/v1.0";

const API_KEY_HEADER: &str = "X-Api-Key";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::RemoveBg,
    name: "Remove.bg",
    description: "Specialized background removal service with high quality output",
    supported_modes: &[GenerationMode::BackgroundRemoval],
    models: &[
        ModelInfo {
            id: "auto",
            name: "Auto Background Removal",
            capabilities: &[GenerationMode::BackgroundRemoval],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 5,
            cost_per_image: Some(0.01),
        },
        ModelInfo {
            id: "standard",
            name: "Standard Quality",
            capabilities: &[GenerationMode::BackgroundRemoval],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 3,
            cost_per_image: Some(0.02),
        },
        ModelInfo {
            id: "hd",
            name: "HD Quality",
            capabilities: &[GenerationMode::BackgroundRemoval],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 8,
            cost_per_image: Some(0.05),
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(50, 1)),
    requires_api_key: true,
};

/// The vendor's `size` parameter for a model id
fn output_size(model: &str) -> &'static str {
    match model {
        "standard" => "medium",
        "hd" => "preview",
        _ => "auto",
    }
}

pub struct RemoveBgBackend {
    client: VendorClient,
}

impl RemoveBgBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::RemoveBg, DEFAULT_BASE_URL, options, context)?,
        })
    }
}

#[async_trait]
impl ImageBackend for RemoveBgBackend {
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
            .header(API_KEY_HEADER, api_key);
        Ok(self.client.check_key(request).await)
    }

    /// Text generation is not offered; only background removal requests get through
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        match request.mode {
            GenerationMode::BackgroundRemoval => self.remove_background(request).await,
            _ => Err(AppError::CapabilityUnsupported {
                backend: BackendId::RemoveBg,
                capability: Capability::Generate,
            }),
        }
    }

    async fn remove_background(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let source = request.require_source_image("background removal")?;

        let form = Form::new()
            .part("image_file", image_part(source, "image")?)
            .text("size", output_size(&request.model))
            .text("format", "png");

        let builder = self
            .client
            .http()
            .post(self.client.endpoint("removebg"))
            .header(API_KEY_HEADER, self.client.api_key()?)
            .multipart(form);
        let bytes = self.client.send(builder).await?.bytes().await?;

        Ok(vec![GeneratedImage::from_bytes(bytes.to_vec(), request.size(&DESCRIPTOR))])
    }
}
