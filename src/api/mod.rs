//! HTTP API over the dispatcher

pub mod handlers;
pub mod routes;

pub use routes::create_router;
