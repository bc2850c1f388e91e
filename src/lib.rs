pub mod config;
pub mod errors;
pub mod experiment;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod stages;
