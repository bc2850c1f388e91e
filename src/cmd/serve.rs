//! HTTP server command: `housing-pipeline serve`.

use std::path::Path;

use anyhow::Result;

use housing_pipeline::server::{ServerConfig, start_server};

pub async fn cmd_serve(project_dir: &Path, config_path: &Path, port: u16, dev: bool) -> Result<()> {
    start_server(ServerConfig {
        port,
        project_dir: project_dir.to_path_buf(),
        config_path: config_path.to_path_buf(),
        dev_mode: dev,
    })
    .await
}
