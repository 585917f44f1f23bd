//! Together AI backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::http::{AdapterContext, AdapterOptions, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, GeneratedImage, GenerationMode, GenerationRequest, ImageBackend,
    ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::Result;
use crate::response::{base64, sniff_media_type};

pub const DEFAULT_BASE_URL: &str = "https://api.together.xyz/v1";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::TogetherAi,
    name: "Together AI",
    description: "Fast and affordable image generation with editing",
    supported_modes: &[
        GenerationMode::TextToImage,
        GenerationMode::ImageToImage,
        GenerationMode::Inpainting,
    ],
    models: &[
        ModelInfo {
            id: "black-forest-labs/FLUX.1-schnell-Free",
            name: "Flux Schnell (Free)",
            capabilities: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 4,
            estimated_time: 5,
            cost_per_image: Some(0.0),
        },
        ModelInfo {
            id: "black-forest-labs/FLUX.1.1-pro",
            name: "Flux 1.1 Pro",
            capabilities: &[
                GenerationMode::TextToImage,
                GenerationMode::ImageToImage,
                GenerationMode::Inpainting,
            ],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 10,
            cost_per_image: Some(0.04),
        },
        ModelInfo {
            id: "black-forest-labs/FLUX.1-dev-Inpainting",
            name: "Flux Dev Inpainting",
            capabilities: &[GenerationMode::ImageToImage, GenerationMode::Inpainting],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 15,
            cost_per_image: Some(0.08),
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(60, 4)),
    requires_api_key: true,
};

#[derive(Debug, Serialize)]
struct TogetherRequest<'a> {
    model: &'a str,
    prompt: String,
    width: u32,
    height: u32,
    n: u32,
    response_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strength: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct TogetherResponse {
    #[serde(default)]
    data: Vec<TogetherImage>,
}

#[derive(Debug, Deserialize)]
struct TogetherImage {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    seed: Option<i64>,
}

fn data_url(bytes: &[u8]) -> String {
    base64::create_data_url(bytes, sniff_media_type(bytes).unwrap_or("image/png"))
}

pub struct TogetherBackend {
    client: VendorClient,
}

impl TogetherBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::TogetherAi, DEFAULT_BASE_URL, options, context)?,
        })
    }

    fn body<'a>(&self, request: &'a GenerationRequest, mode: GenerationMode) -> TogetherRequest<'a> {
        let size = request.size(&DESCRIPTOR);
        let mut body = TogetherRequest {
            model: &request.model,
            prompt: self.client.enhance_prompt(request),
            width: size.width,
            height: size.height,
            n: request.image_count.max(1),
            response_format: "b64_json",
            negative_prompt: request.negative_prompt.as_deref(),
            steps: request.steps,
            seed: request.seed,
            image_url: None,
            mask_url: None,
            strength: None,
        };

        let Some(source) = request.source_image.as_deref() else {
            return body;
        };
        match (mode, request.mask_image.as_deref()) {
            (GenerationMode::Inpainting, Some(mask)) if request.model.contains("Inpainting") => {
                body.image_url = Some(data_url(source));
                body.mask_url = Some(data_url(mask));
                body.strength = Some(request.strength.unwrap_or(0.8));
            }
            (GenerationMode::ImageToImage | GenerationMode::Inpainting, _) if request.model.contains("FLUX") => {
                body.image_url = Some(data_url(source));
                body.strength = Some(request.strength.unwrap_or(0.75));
            }
            _ => {}
        }
        body
    }

    async fn submit(&self, request: &GenerationRequest, mode: GenerationMode) -> Result<Vec<GeneratedImage>> {
        let body = self.body(request, mode);
        let size = ImageSize {
            width: body.width,
            height: body.height,
        };

        let response = self
            .client
            .send(self.client.post_bearer("images/generations")?.json(&body))
            .await?;
        let parsed: TogetherResponse = response.json().await?;

        parsed
            .data
            .into_iter()
            .filter_map(|item| {
                let image = match (item.b64_json, item.url) {
                    (Some(b64), _) => base64::decode(&b64).map(|bytes| GeneratedImage::from_bytes(bytes, size)),
                    (None, Some(url)) => Ok(GeneratedImage::from_url(url, size)),
                    (None, None) => return None,
                };
                Some(image.map(|img| img.with_seed(item.seed)))
            })
            .collect()
    }
}

#[async_trait]
impl ImageBackend for TogetherBackend {
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
            .get(self.client.endpoint("models"))
            .bearer_auth(api_key);
        Ok(self.client.check_key(request).await)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        self.submit(request, GenerationMode::TextToImage).await
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        request.require_source_image("image-to-image")?;
        self.submit(request, GenerationMode::ImageToImage).await
    }

    async fn inpaint(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        request.require_source_image("inpainting")?;
        self.submit(request, GenerationMode::Inpainting).await
    }
}
