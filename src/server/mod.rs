//! HTTP trigger and observer surface.

pub mod api;
pub mod http;

pub use api::{AppState, SharedState, api_router};
pub use http::{ServerConfig, build_router, start_server};
