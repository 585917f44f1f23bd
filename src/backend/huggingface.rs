//! HuggingFace Inference API backend: inpainting and image-to-image on hosted models

use async_trait::async_trait;
use reqwest::multipart::Form;

use crate::backend::http::{image_part, AdapterContext, AdapterOptions, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, Capability, GeneratedImage, GenerationMode, GenerationRequest,
    ImageBackend, ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::{AppError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// Model used for key checks and for background removal
const IMAGE_TO_IMAGE_MODEL: &str = "CompVis/stable-diffusion-v1-4";

const BACKGROUND_REMOVAL_PROMPT: &str =
    "Remove the background, make it transparent, keep the main subject intact";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::HuggingFace,
    name: "HuggingFace",
    description: "Open-source models for image inpainting and processing",
    supported_modes: &[
        GenerationMode::Inpainting,
        GenerationMode::ImageToImage,
        GenerationMode::BackgroundRemoval,
    ],
    models: &[
        ModelInfo {
            id: "Sanster/lama-cleaner",
            name: "LAMA Cleaner",
            capabilities: &[GenerationMode::Inpainting],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 10,
            cost_per_image: Some(0.0),
        },
        ModelInfo {
            id: "runwayml/stable-diffusion-inpainting",
            name: "Stable Diffusion Inpainting",
            capabilities: &[GenerationMode::Inpainting],
            default_size: ImageSize::SQUARE_512,
            max_images: 1,
            estimated_time: 20,
            cost_per_image: Some(0.0),
        },
        ModelInfo {
            id: IMAGE_TO_IMAGE_MODEL,
            name: "Stable Diffusion Image-to-Image",
            capabilities: &[GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_512,
            max_images: 1,
            estimated_time: 15,
            cost_per_image: Some(0.0),
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(10, 1)),
    requires_api_key: true,
};

/// LaMa-style cleaners take only image and mask
fn accepts_prompt(model: &str) -> bool {
    model.contains("stable-diffusion")
}

pub struct HuggingFaceBackend {
    client: VendorClient,
}

impl HuggingFaceBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::HuggingFace, DEFAULT_BASE_URL, options, context)?,
        })
    }

    /// Models answer with the image bytes directly
    async fn run(&self, request: &GenerationRequest, form: Form) -> Result<Vec<GeneratedImage>> {
        let builder = self.client.post_bearer(&request.model)?.multipart(form);
        let bytes = self.client.send(builder).await?.bytes().await?;

        Ok(vec![GeneratedImage::from_bytes(bytes.to_vec(), request.size(&DESCRIPTOR))])
    }
}

#[async_trait]
impl ImageBackend for HuggingFaceBackend {
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
            .get(self.client.endpoint(IMAGE_TO_IMAGE_MODEL))
            .bearer_auth(api_key);
        Ok(self.client.check_key(request).await)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        match request.mode {
            GenerationMode::Inpainting => self.inpaint(request).await,
            GenerationMode::ImageToImage => self.edit_image(request).await,
            GenerationMode::BackgroundRemoval => self.remove_background(request).await,
            mode => Err(AppError::CapabilityUnsupported {
                backend: BackendId::HuggingFace,
                capability: Capability::for_mode(mode),
            }),
        }
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let source = request.require_source_image("image-to-image")?;

        let mut form = Form::new()
            .part("inputs", image_part(source, "image")?)
            .text("prompt", self.client.enhance_prompt(request))
            .text("strength", request.strength.unwrap_or(0.7).to_string());
        if let Some(mask) = request.mask_image.as_deref() {
            form = form.part("mask", image_part(mask, "mask")?);
        }

        self.run(request, form).await
    }

    async fn inpaint(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let source = request.require_source_image("inpainting")?;
        let mask = request
            .mask_image
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("Mask image is required for inpainting".to_string()))?;

        let mut form = Form::new()
            .part("inputs", image_part(source, "image")?)
            .part("mask", image_part(mask, "mask")?);
        if !request.prompt.trim().is_empty() && accepts_prompt(&request.model) {
            form = form.text("prompt", request.prompt.clone());
        }

        self.run(request, form).await
    }

    /// No dedicated model; a strong image-to-image pass with a fixed prompt
    async fn remove_background(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let mut rewritten = request.clone();
        rewritten.mode = GenerationMode::ImageToImage;
        rewritten.model = IMAGE_TO_IMAGE_MODEL.to_string();
        rewritten.prompt = BACKGROUND_REMOVAL_PROMPT.to_string();
        rewritten.strength = Some(0.8);
        self.edit_image(&rewritten).await
    }
}
