//! Common traits and types for image generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Identifier of a remote image backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendId {
    #[serde(rename = "google-gemini")]
    GoogleGemini,
    #[serde(rename = "openai-dalle")]
    OpenAiDalle,
    #[serde(rename = "stability-ai")]
    StabilityAi,
    #[serde(rename = "replicate")]
    Replicate,
    #[serde(rename = "together-ai")]
    TogetherAi,
    #[serde(rename = "removebg")]
    RemoveBg,
    #[serde(rename = "clipdrop")]
    Clipdrop,
    #[serde(rename = "huggingface")]
    HuggingFace,
    #[serde(rename = "deepai")]
    DeepAi,
}

impl BackendId {
    pub const ALL: [BackendId; 9] = [
        BackendId::GoogleGemini,
        BackendId::OpenAiDalle,
        BackendId::StabilityAi,
        BackendId::Replicate,
        BackendId::TogetherAi,
        BackendId::RemoveBg,
        BackendId::Clipdrop,
        BackendId::HuggingFace,
        BackendId::DeepAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::GoogleGemini => "google-gemini",
            BackendId::OpenAiDalle => "openai-dalle",
            BackendId::StabilityAi => "stability-ai",
            BackendId::Replicate => "replicate",
            BackendId::TogetherAi => "together-ai",
            BackendId::RemoveBg => "removebg",
            BackendId::Clipdrop => "clipdrop",
            BackendId::HuggingFace => "huggingface",
            BackendId::DeepAi => "deepai",
        }
    }

    /// Environment variable conventionally holding this backend's API key
    pub fn credential_env_var(&self) -> &'static str {
        match self {
            BackendId::GoogleGemini => "GEMINI_API_KEY",
            BackendId::OpenAiDalle => "OPENAI_API_KEY",
            BackendId::StabilityAi => "STABILITY_API_KEY",
            BackendId::Replicate => "REPLICATE_API_TOKEN",
            BackendId::TogetherAi => "TOGETHER_API_KEY",
            BackendId::RemoveBg => "REMOVEBG_API_KEY",
            BackendId::Clipdrop => "CLIPDROP_API_KEY",
            BackendId::HuggingFace => "HUGGINGFACE_API_KEY",
            BackendId::DeepAi => "DEEPAI_API_KEY",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        BackendId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::InvalidRequest(format!("Unknown backend '{}'", s)))
    }
}

/// What the caller wants done with the prompt and images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    TextToImage,
    ImageToImage,
    Inpainting,
    Outpainting,
    BackgroundRemoval,
}

/// Adapter entry point a mode is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Generate,
    EditImage,
    Inpaint,
    RemoveBackground,
}

impl Capability {
    pub fn for_mode(mode: GenerationMode) -> Self {
        match mode {
            GenerationMode::Inpainting => Capability::Inpaint,
            GenerationMode::ImageToImage => Capability::EditImage,
            GenerationMode::BackgroundRemoval => Capability::RemoveBackground,
            GenerationMode::TextToImage | GenerationMode::Outpainting => Capability::Generate,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Generate => "image generation",
            Capability::EditImage => "image editing",
            Capability::Inpaint => "inpainting",
            Capability::RemoveBackground => "background removal",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const SQUARE_512: ImageSize = ImageSize { width: 512, height: 512 };
    pub const SQUARE_1024: ImageSize = ImageSize { width: 1024, height: 1024 };
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A model offered by a backend
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub capabilities: &'static [GenerationMode],
    pub default_size: ImageSize,
    pub max_images: u32,
    /// Typical wall-clock time in seconds
    pub estimated_time: u32,
    /// USD per generated image
    pub cost_per_image: Option<f64>,
}

/// Admission policy declared by a backend (or overridden in settings)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub requests_per_window: u32,
    pub window_ms: u64,
    pub images_per_request: u32,
}

impl RateLimitPolicy {
    pub const fn per_minute(requests_per_window: u32, images_per_request: u32) -> Self {
        Self {
            requests_per_window,
            window_ms: 60_000,
            images_per_request,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Static description of a backend: modes, models and limits
#[derive(Debug, Clone, Serialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub name: &'static str,
    pub description: &'static str,
    pub supported_modes: &'static [GenerationMode],
    pub models: &'static [ModelInfo],
    pub rate_limit: Option<RateLimitPolicy>,
    pub requires_api_key: bool,
}

impl BackendDescriptor {
    pub fn model(&self, id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Request to generate or edit images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub backend: BackendId,

    pub model: String,

    pub mode: GenerationMode,

    pub prompt: String,

    /// Things to avoid
    #[serde(default)]
    pub negative_prompt: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// e.g. "16:9"; only some backends honor it
    #[serde(default)]
    pub aspect_ratio: Option<String>,

    /// Source image for editing modes (base64 or data URL on the wire)
    #[serde(default, with = "crate::response::base64::optional")]
    pub source_image: Option<Vec<u8>>,

    /// Mask for inpainting (base64 or data URL on the wire)
    #[serde(default, with = "crate::response::base64::optional")]
    pub mask_image: Option<Vec<u8>>,

    /// 0-1, how much to transform the source image
    #[serde(default)]
    pub strength: Option<f32>,

    #[serde(default)]
    pub guidance_scale: Option<f32>,

    #[serde(default)]
    pub steps: Option<u32>,

    #[serde(default = "default_image_count", alias = "n")]
    pub image_count: u32,

    #[serde(default)]
    pub seed: Option<i64>,

    /// Style preset id
    #[serde(default)]
    pub style: Option<String>,
}

fn default_image_count() -> u32 {
    1
}

impl GenerationRequest {
    pub fn new(
        backend: BackendId,
        model: impl Into<String>,
        mode: GenerationMode,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            mode,
            prompt: prompt.into(),
            negative_prompt: None,
            width: None,
            height: None,
            aspect_ratio: None,
            source_image: None,
            mask_image: None,
            strength: None,
            guidance_scale: None,
            steps: None,
            image_count: 1,
            seed: None,
            style: None,
        }
    }

    pub fn with_source_image(mut self, image: Vec<u8>) -> Self {
        self.source_image = Some(image);
        self
    }

    pub fn with_mask(mut self, mask: Vec<u8>) -> Self {
        self.mask_image = Some(mask);
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_image_count(mut self, count: u32) -> Self {
        self.image_count = count;
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    /// Requested size, falling back to the model's default and then to 1024x1024
    pub fn size(&self, descriptor: &BackendDescriptor) -> ImageSize {
        let fallback = descriptor
            .model(&self.model)
            .map(|m| m.default_size)
            .unwrap_or(ImageSize::SQUARE_1024);
        ImageSize {
            width: self.width.unwrap_or(fallback.width),
            height: self.height.unwrap_or(fallback.height),
        }
    }

    /// Source image, or an `InvalidRequest` error naming what needs it
    pub fn require_source_image(&self, purpose: &str) -> Result<&[u8]> {
        self.source_image
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest(format!("Source image is required for {}", purpose)))
    }
}

/// Where the bytes of a generated image live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePayload {
    Url(String),
    Inline {
        media_type: String,
        #[serde(with = "crate::response::base64::required")]
        data: Vec<u8>,
    },
}

/// Generated image data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub payload: ImagePayload,
    pub width: u32,
    pub height: u32,
    pub seed: Option<i64>,
    /// Revised prompt if the model modified it
    pub revised_prompt: Option<String>,
}

impl GeneratedImage {
    pub fn from_url(url: impl Into<String>, size: ImageSize) -> Self {
        Self::new(ImagePayload::Url(url.into()), size)
    }

    pub fn from_bytes(data: Vec<u8>, size: ImageSize) -> Self {
        let media_type = crate::response::sniff_media_type(&data)
            .unwrap_or("image/png")
            .to_string();
        Self::new(ImagePayload::Inline { media_type, data }, size)
    }

    fn new(payload: ImagePayload, size: ImageSize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            width: size.width,
            height: size.height,
            seed: None,
            revised_prompt: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<i64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_revised_prompt(mut self, prompt: Option<String>) -> Self {
        self.revised_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }
}

fn unsupported(backend: BackendId, capability: Capability) -> AppError {
    AppError::CapabilityUnsupported { backend, capability }
}

/// Trait for image generation backends
///
/// Only `generate` is mandatory. The editing entry points fail fast with
/// `CapabilityUnsupported` unless an adapter overrides them.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Static description of this backend
    fn descriptor(&self) -> &BackendDescriptor;

    /// True only when a usable credential is present
    fn is_configured(&self) -> bool;

    /// Check a credential against the vendor without storing it
    async fn validate_api_key(&self, api_key: &str) -> Result<bool>;

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>>;

    async fn edit_image(&self, _request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        Err(unsupported(self.id(), Capability::EditImage))
    }

    async fn inpaint(&self, _request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        Err(unsupported(self.id(), Capability::Inpaint))
    }

    async fn remove_background(&self, _request: &GenerationRequest) -> Result<Vec<GeneratedImage>> {
        Err(unsupported(self.id(), Capability::RemoveBackground))
    }

    fn id(&self) -> BackendId {
        self.descriptor().id
    }

    fn supports_mode(&self, mode: GenerationMode) -> bool {
        self.descriptor().supported_modes.contains(&mode)
    }

    /// USD cost of a request, when the model declares a price
    fn estimate_cost(&self, request: &GenerationRequest) -> Option<f64> {
        self.descriptor()
            .model(&request.model)
            .and_then(|m| m.cost_per_image)
            .map(|cost| cost * f64::from(request.image_count.max(1)))
    }
}
