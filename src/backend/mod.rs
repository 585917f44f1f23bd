//! Backend module - adapter trait, vendor adapters, credentials and registry

pub mod clipdrop;
pub mod credentials;
pub mod deepai;
pub mod gemini;
pub mod http;
pub mod huggingface;
pub mod openai;
pub mod registry;
pub mod removebg;
pub mod replicate;
pub mod stability;
pub mod styles;
pub mod together;
pub mod traits;

pub use registry::BackendRegistry;
pub use traits::{
    BackendDescriptor, BackendId, GeneratedImage, GenerationMode, GenerationRequest, ImageBackend,
    ImagePayload,
};
