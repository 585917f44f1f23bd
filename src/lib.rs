//! Image generation request dispatcher
//!
//! Accepts generation requests for third-party image backends, queues them
//! per backend, releases them under each backend's sliding-window rate limit,
//! and answers every request with a uniform `GenerationResponse`.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod middleware;
pub mod queue;
pub mod response;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::registry::BackendRegistry;
use queue::dispatcher::Dispatcher;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub registry: Arc<BackendRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Build the registry and dispatcher from settings. The dispatch loop is not started.
    pub fn from_settings(settings: config::Settings) -> Result<Self> {
        let registry = Arc::new(BackendRegistry::from_settings(&settings)?);
        let dispatcher = Arc::new(Dispatcher::with_config(
            registry.clone(),
            settings.dispatcher.to_config(),
        ));
        Ok(Self {
            settings: Arc::new(settings),
            registry,
            dispatcher,
        })
    }
}
