use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::config::{PusherConfig, RunConfig};
use crate::pipeline::{EvaluationArtifact, PusherArtifact, Stage};

/// Copies an accepted model into the timestamped export directory.
#[derive(Debug, Default)]
pub struct ModelPusher;

impl ModelPusher {
    pub fn new() -> Self {
        Self
    }
}

pub fn export_model(config: &PusherConfig, input: &EvaluationArtifact) -> Result<PusherArtifact> {
    let source = &input.evaluated_model_path;
    let file_name = source
        .file_name()
        .context("Evaluated model path has no file name")?;
    let export_model_file_path = config.export_dir_path.join(file_name);

    std::fs::create_dir_all(&config.export_dir_path)
        .with_context(|| format!("Failed to create {}", config.export_dir_path.display()))?;
    std::fs::copy(source, &export_model_file_path).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            export_model_file_path.display()
        )
    })?;

    info!(path = %export_model_file_path.display(), "Model exported");
    Ok(PusherArtifact {
        export_model_file_path,
        is_model_pushed: true,
        message: "Model pushed successfully.".to_string(),
    })
}

#[async_trait]
impl Stage for ModelPusher {
    type Input = EvaluationArtifact;
    type Output = PusherArtifact;

    async fn initiate(&self, config: &RunConfig, input: EvaluationArtifact) -> Result<PusherArtifact> {
        let pusher = config.pusher.clone();
        tokio::task::spawn_blocking(move || export_model(&pusher, &input))
            .await
            .context("Pusher task panicked")?
    }
}
