use std::path::{Path, PathBuf};
use tokio::fs;

use super::{PartialRunConfig, RunConfig};
use crate::error::{Error, Result};

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "parallelit.toml";

/// Builds a [`RunConfig`] from the file, environment and CLI layers.
pub struct ConfigLoader {
    base_dir: PathBuf,
    env: PartialRunConfig,
}

impl ConfigLoader {
    pub fn new(base_dir: &Path) -> Result<Self> {
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            env: PartialRunConfig::from_env()?,
        })
    }

    /// Loader that ignores the process environment.
    pub fn with_env(base_dir: &Path, env: PartialRunConfig) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            env,
        }
    }

    pub async fn load_file(path: &Path) -> Result<PartialRunConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let layer: PartialRunConfig = toml::from_str(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(layer)
    }

    /// Resolve the final configuration. An explicit `config_path` must exist;
    /// the default file is optional.
    pub async fn load(
        &self,
        config_path: Option<&Path>,
        cli: PartialRunConfig,
    ) -> Result<RunConfig> {
        let file_layer = match config_path {
            Some(path) => Self::load_file(path).await?,
            None => {
                let default_path = self.base_dir.join(DEFAULT_CONFIG_FILE);
                if fs::try_exists(&default_path).await.unwrap_or(false) {
                    Self::load_file(&default_path).await?
                } else {
                    PartialRunConfig::default()
                }
            }
        };

        let config = file_layer.merge(self.env.clone()).merge(cli).resolve()?;
        tracing::trace!("Resolved run configuration: {:?}", config);
        Ok(config)
    }
}
