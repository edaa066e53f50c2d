use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "WALLFLOW_CONFIG_DIR";
pub const ENV_RUNTIME_DIR: &str = "WALLFLOW_RUNTIME_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "wallflow";
const APPLICATION: &str = "wallflow";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    runtime_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;

        let config_dir = match env::var_os(ENV_CONFIG_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => project_dirs.config_dir().to_path_buf(),
        };
        let runtime_dir = resolve_runtime_dir()?;

        Ok(Self {
            config_dir,
            runtime_dir,
        })
    }

    pub fn default_config_file(&self) -> PathBuf {
        self.config_dir.join("wallflow.toml")
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join("wallflow.sock")
    }

    /// Directory holding one status JSON file per output.
    pub fn status_dir(&self) -> PathBuf {
        self.runtime_dir.join("status")
    }
}

fn resolve_runtime_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os(ENV_RUNTIME_DIR) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = env::var_os("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(dir).join("wallflow"));
    }
    // Last resort for sessions without a runtime dir.
    let fallback = env::temp_dir().join("wallflow");
    std::fs::create_dir_all(&fallback)
        .with_context(|| format!("failed to create {}", fallback.display()))?;
    Ok(fallback)
}
