//! Google Gemini image backend (generateContent REST API)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::http::{AdapterContext, AdapterOptions, VendorClient};
use crate::backend::traits::{
    BackendDescriptor, BackendId, GeneratedImage, GenerationMode, GenerationRequest, ImageBackend,
    ImagePayload, ImageSize, ModelInfo, RateLimitPolicy,
};
use crate::error::{AppError, Result};
use crate::response::{base64, sniff_media_type};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

static DESCRIPTOR: BackendDescriptor = BackendDescriptor {
    id: BackendId::GoogleGemini,
    name: "Google Gemini",
    description: "Google's multimodal AI models with image generation",
    supported_modes: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
    models: &[
        ModelInfo {
            id: "gemini-2.5-flash-image",
            name: "Gemini 2.5 Flash",
            capabilities: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 5,
            cost_per_image: None,
        },
        ModelInfo {
            id: "gemini-3-pro-image-preview",
            name: "Gemini 3.0 Pro",
            capabilities: &[GenerationMode::TextToImage, GenerationMode::ImageToImage],
            default_size: ImageSize::SQUARE_1024,
            max_images: 1,
            estimated_time: 10,
            cost_per_image: None,
        },
    ],
    rate_limit: Some(RateLimitPolicy::per_minute(10, 1)),
    requires_api_key: true,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart {
    Text(String),
    #[serde(rename_all = "camelCase")]
    InlineData { mime_type: String, data: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

pub struct GeminiBackend {
    client: VendorClient,
}

impl GeminiBackend {
    pub fn new(options: &AdapterOptions, context: &AdapterContext) -> Result<Self> {
        Ok(Self {
            client: VendorClient::new(BackendId::GoogleGemini, DEFAULT_BASE_URL, options, context)?,
        })
    }

    fn parts(&self, request: &GenerationRequest) -> Vec<RequestPart> {
        let prompt = self.client.enhance_prompt(request);
        match request.source_image.as_deref() {
            Some(source) => vec![
                RequestPart::InlineData {
                    mime_type: sniff_media_type(source).unwrap_or("image/png").to_string(),
                    data: base64::encode(source),
                },
                RequestPart::Text(format!(
                    "Edit this image. {}. Maintain the composition but apply these changes.",
                    prompt
                )),
            ],
            None => vec![RequestPart::Text(prompt)],
        }
    }

    fn collect(response: GenerateContentResponse, size: ImageSize) -> Result<Vec<GeneratedImage>> {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(AppError::Api {
                backend: BackendId::GoogleGemini,
                status: 200,
                code: Some("safety".to_string()),
                message: format!("Prompt was blocked ({})", reason),
            });
        }

        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.inline_data)
            .map(|inline| {
                let bytes = base64::decode(&inline.data)?;
                let mut image = GeneratedImage::from_bytes(bytes, size);
                if let (Some(mime), ImagePayload::Inline { media_type, .. }) =
                    (inline.mime_type, &mut image.payload)
                {
                    *media_type = mime;
                }
                Ok(image)
            })
            .collect()
    }
}

#[async_trait]
impl ImageBackend for GeminiBackend {
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
            .header(API_KEY_HEADER, api_key);
        Ok(self.client.check_key(request).await)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        let body = json!({
            "contents": [{ "parts": self.parts(request) }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });
        let path = format!("models/{}:generateContent", request.model);

        let builder = self
            .client
            .http()
            .post(self.client.endpoint(&path))
            .header(API_KEY_HEADER, self.client.api_key()?)
            .json(&body);
        let parsed: GenerateContentResponse = self.client.send(builder).await?.json().await?;
        Self::collect(parsed, request.size(&DESCRIPTOR))
    }

    async fn edit_image(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        request.require_source_image("image editing")?;
        self.generate(request).await
    }
}
