//! Clipdrop backend: cleanup, inpainting, relighting and upscaling

use async_trait::async_trait;
use reqwest::multipart::Form;

use crate::backend::http::{image_part, AdapterContext, AdapterOptions, KeyCheck, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, Capability, GeneratedImage, GenerationMode, GenerationRequest,
    ImageBackend, ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::{AppError, Result};

pub const DEFAULT_BASE_URL: &str = "https://clipdrop-api.co";

const API_KEY_HEADER: &str = "x-api-key";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::Clipdrop,
    name: "Clipdrop (Stability AI)",
    description: "Advanced image editing with object removal, inpainting, and relighting",
    supported_modes: &[
        GenerationMode::Inpainting,
        GenerationMode::BackgroundRemoval,
        GenerationMode::ImageToImage,
    ],
    models: &[
        ModelInfo {
            id: "cleanup",
            name: "Object Removal / Cleanup",
            capabilities: &[GenerationMode::Inpainting, GenerationMode::BackgroundRemoval],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 8,
            cost_per_image: Some(0.01),
        },
        ModelInfo {
            id: "inpainting",
            name: "Inpainting",
            capabilities: &[GenerationMode::Inpainting],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 10,
            cost_per_image: Some(0.015),
        },
        ModelInfo {
            id: "relight",
            name: "Relighting",
            capabilities: &[GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 12,
            cost_per_image: Some(0.02),
        },
        ModelInfo {
            id: "upscale",
            name: "Upscale",
            capabilities: &[GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 6,
            cost_per_image: Some(0.005),
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(100, 1)),
    requires_api_key: true,
};

fn endpoint_for(model: &str) -> &'static str {
    match model {
        "relight" => "relight/v1",
        "upscale" => "image-upscaling/v1",
        "inpainting" => "inpainting/v1",
        _ => "cleanup/v1",
    }
}

pub struct ClipdropBackend {
    client: VendorClient,
}

impl ClipdropBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::Clipdrop, DEFAULT_BASE_URL, options, context)?,
        })
    }

    async fn post_form(&self, request: &GenerationRequest, endpoint: &str, form: Form) -> Result<Vec<GeneratedImage>> {
        let builder = self
            .client
            .http()
            .post(self.client.endpoint(endpoint))
            .header(API_KEY_HEADER, self.client.api_key()?)
            .multipart(form);
        let bytes = self.client.send(builder).await?.bytes().await?;

        Ok(vec![GeneratedImage::from_bytes(bytes.to_vec(), request.size(&DESCRIPTOR))])
    }

    /// Cleanup or inpainting; the mask goes along when one is given
    async fn cleanup(&self, request: &GenerationRequest, purpose: &str) -> Result<Vec<GeneratedImage>> {
        let source = request.require_source_image(purpose)?;
        let mut form = Form::new().part("image_file", image_part(source, "image")?);

        let wants_mask = request.mode == GenerationMode::Inpainting || request.model == "inpainting";
        if let (true, Some(mask)) = (wants_mask, request.mask_image.as_deref()) {
            form = form.part("mask_file", image_part(mask, "mask")?);
        }
        if request.model == "inpainting" {
            form = form.text("text_prompt", request.prompt.clone());
        }

        let endpoint = if request.model == "inpainting" {
            "inpainting/v1"
        } else {
            "cleanup/v1"
        };
        self.post_form(request, endpoint, form).await
    }
}

#[async_trait]
impl ImageBackend for ClipdropBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &DESCRIPTOR
    }

    fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    /// Clipdrop has no account endpoint; an empty cleanup call is rejected
    /// with 400 for good keys and 401/403 for bad ones.
    async fn validate_api_key(&self, api_key: &str) -> Result<bool> {
        let request = self
            .client
            .http()
            .post(self.client.endpoint("cleanup/v1"))
            .header(API_KEY_HEADER, api_key)
            .multipart(Form::new());
        Ok(self.client.check_key_with(request, KeyCheck::NotUnauthorized).await)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        Err(AppError::CapabilityUnsupported {
            backend: BackendId::Clipdrop,
            capability: Capability::for_mode(request.mode),
        })
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let source = request.require_source_image("image editing")?;
        let form = Form::new().part("image_file", image_part(source, "image")?);
        self.post_form(request, endpoint_for(&request.model), form).await
    }

    async fn inpaint(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.cleanup(request, "inpainting").await
    }

    async fn remove_background(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.cleanup(request, "background removal").await
    }
}
