use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Locations of every persisted surface, relative to a device root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("var").join("lib").join("remodel")
    }

    pub fn device_state_path(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    pub fn modeenv_path(&self) -> PathBuf {
        self.state_dir().join("modeenv")
    }

    pub fn finalize_dir(&self) -> PathBuf {
        self.state_dir().join("finalize")
    }

    pub fn finalize_state_path(&self, change_id: &str) -> PathBuf {
        self.finalize_dir().join(format!("{change_id}.json"))
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.root.join("run").join("mnt").join("ubuntu-boot").join("device")
    }

    pub fn boot_model_path(&self) -> PathBuf {
        self.boot_dir().join("model")
    }

    pub fn seed_dir(&self) -> PathBuf {
        self.root.join("run").join("mnt").join("ubuntu-seed")
    }

    pub fn systems_dir(&self) -> PathBuf {
        self.seed_dir().join("systems")
    }

    pub fn system_dir(&self, label: &str) -> PathBuf {
        self.systems_dir().join(label)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.finalize_dir(),
            self.boot_dir(),
            self.systems_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
