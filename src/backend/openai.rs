//! OpenAI DALL·E backend

use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};

use crate::backend::http::{image_part, AdapterContext, AdapterOptions, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, GeneratedImage, GenerationMode, GenerationRequest, ImageBackend,
    ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::Result;
use crate::response::base64;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::OpenAiDalle,
    name: "OpenAI DALL-E",
    description: "State-of-the-art image generation from OpenAI",
    supported_modes: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
    models: &[
        ModelInfo {
            id: "dall-e-3",
            name: "DALL-E 3",
            capabilities: &[GenerationMode::TextToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 20,
            cost_per_image: Some(0.04),
        },
        ModelInfo {
            id: "dall-e-2",
            name: "DALL-E 2",
            capabilities: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 4,
            estimated_time: 15,
            cost_per_image: Some(0.02),
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(5, 4)),
    requires_api_key: true,
};

#[derive(Debug, Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: String,
    n: u32,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

pub struct OpenAiBackend {
    client: VendorClient,
}

impl OpenAiBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::OpenAiDalle, DEFAULT_BASE_URL, options, context)?,
        })
    }

    /// DALL·E 3 only ever returns one image per call
    fn image_count(request: &GenerationRequest) -> u32 {
        if request.model == "dall-e-3" {
            1
        } else {
            request.image_count.max(1)
        }
    }

    fn collect(response: ImagesResponse, size: ImageSize) -> Result<Vec<GeneratedImage>> {
        response
            .data
            .into_iter()
            .filter_map(|item| {
                let image = match (item.b64_json, item.url) {
                    (Some(b64), _) => base64::decode(&b64).map(|bytes| GeneratedImage::from_bytes(bytes, size)),
                    (None, Some(url)) => Ok(GeneratedImage::from_url(url, size)),
                    (None, None) => return None,
                };
                Some(image.map(|img| img.with_revised_prompt(item.revised_prompt)))
            })
            .collect()
    }
}

#[async_trait]
impl ImageBackend for OpenAiBackend {
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
        let size = request.size(&DESCRIPTOR);
        let hd = request.model == "dall-e-3";
        let body = ImagesRequest {
            model: &request.model,
            prompt: self.client.enhance_prompt(request),
            n: Self::image_count(request),
            size: size.to_string(),
            quality: hd.then_some("hd"),
            style: hd.then_some("vivid"),
            response_format: "b64_json",
        };

        let response = self
            .client
            .send(self.client.post_bearer("images/generations")?.json(&body))
            .await?;
        let parsed: ImagesResponse = response.json().await?;
        Self::collect(parsed, size)
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let source = request.require_source_image("image editing")?;
        let size = request.size(&DESCRIPTOR);

        let mut form = Form::new()
            .part("image", image_part(source, "image")?)
            .text("prompt", self.client.enhance_prompt(request))
            .text("n", Self::image_count(request).to_string())
            .text("size", size.to_string())
            .text("response_format", "b64_json");
        if let Some(mask) = request.mask_image.as_deref() {
            form = form.part("mask", image_part(mask, "mask")?);
        }

        let response = self
            .client
            .send(self.client.post_bearer("images/edits")?.multipart(form))
            .await?;
        let parsed: ImagesResponse = response.json().await?;
        Self::collect(parsed, size)
    }
}
