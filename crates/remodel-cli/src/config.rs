use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use remodel_state::{StateLayout, DEFAULT_LABEL_PROBE_LIMIT, DEFAULT_RESEAL_ATTEMPTS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemodelConfig {
    /// Device root all persisted state lives under.
    pub root: PathBuf,
    pub reseal_attempts: u32,
    pub label_probe_limit: u32,
    pub log_format: LogFormat,
}

impl Default for RemodelConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            reseal_attempts: DEFAULT_RESEAL_ATTEMPTS,
            label_probe_limit: DEFAULT_LABEL_PROBE_LIMIT,
            log_format: LogFormat::Text,
        }
    }
}

impl RemodelConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse remodel config")
    }

    /// Reads the config at `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed loading config: {}", path.display()))
    }

    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        if let Some(root) = root {
            self.root = root;
        }
        self
    }

    pub fn layout(&self) -> StateLayout {
        StateLayout::new(&self.root)
    }
}
