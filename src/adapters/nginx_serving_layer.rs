use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    core::{model::Fqdn, synthesizer::ConfigArtifact},
    ports::serving_layer::{ServingError, ServingLayer, ServingResult},
};

/// Serving layer backed by an nginx-style include directory: one file per
/// server block, activated by running a reload command such as
/// `nginx -s reload` or `systemctl reload nginx`.
#[derive(Debug, Clone)]
pub struct NginxServingLayer {
    config_dir: PathBuf,
    reload_command: Vec<String>,
}

impl NginxServingLayer {
    pub fn new(config_dir: impl Into<PathBuf>, reload_command: Vec<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            reload_command,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn artifact_path(&self, hostname: &Fqdn) -> PathBuf {
        self.config_dir.join(ConfigArtifact::file_name_for(hostname))
    }
}

#[async_trait]
impl ServingLayer for NginxServingLayer {
    async fn apply_config(&self, artifact: &ConfigArtifact) -> ServingResult<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;

        let path = self.config_dir.join(&artifact.file_name);
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        tokio::fs::write(&temp, artifact.contents.as_bytes()).await?;
        tokio::fs::rename(&temp, &path).await?;

        tracing::debug!(path = %path.display(), "server block written");
        Ok(())
    }

    async fn remove_config(&self, hostname: &Fqdn) -> ServingResult<()> {
        let path = self.artifact_path(hostname);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "server block removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn reload(&self) -> ServingResult<()> {
        let (program, args) = self
            .reload_command
            .split_first()
            .ok_or_else(|| ServingError::Rejected("no reload command configured".to_string()))?;
        let command = self.reload_command.join(" ");

        // kill_on_drop lets the engine's timeout actually stop a hung reload
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            tracing::info!(%command, "serving layer reloaded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!(%command, status = %output.status, %stderr, "serving layer reload failed");
        Err(ServingError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr,
        })
    }
}
