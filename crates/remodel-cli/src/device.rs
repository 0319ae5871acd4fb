use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use remodel_core::{InstalledSnap, Model};
use remodel_planner::{ChangeInfo, DeviceBackend, DeviceSnapshot, GadgetLayout, SystemSeed};
use remodel_state::DeviceStateStore;
use serde::{Deserialize, Serialize};

/// Device facts read from a `device.toml` description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceFile {
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default = "default_seeded")]
    pub seeded: bool,
    #[serde(default)]
    pub system_seed: SystemSeed,
    #[serde(default)]
    pub installed: Vec<InstalledSnap>,
    #[serde(default)]
    pub changes: Vec<ChangeInfo>,
}

fn default_seeded() -> bool {
    true
}

impl DeviceFile {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse device description")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading device description: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed loading device description: {}", path.display()))
    }
}

pub fn load_model(path: &Path) -> Result<Model> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading model: {}", path.display()))?;
    Model::from_toml_str(&content)
        .with_context(|| format!("failed loading model: {}", path.display()))
}

pub fn load_gadget_layout(path: &Path) -> Result<GadgetLayout> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading gadget layout: {}", path.display()))?;
    GadgetLayout::from_toml_str(&content)
        .with_context(|| format!("failed loading gadget layout: {}", path.display()))
}

/// Device backend over a description file and the persisted device records.
pub struct FileBackend {
    current: Model,
    device: DeviceFile,
    store: DeviceStateStore,
    gadget_layout: Option<GadgetLayout>,
}

impl FileBackend {
    pub fn new(current: Model, device: DeviceFile, store: DeviceStateStore) -> Self {
        Self {
            current,
            device,
            store,
            gadget_layout: None,
        }
    }

    /// The seed role is then taken from the gadget instead of the description.
    pub fn with_gadget_layout(mut self, layout: GadgetLayout) -> Self {
        self.gadget_layout = Some(layout);
        self
    }

    pub fn gadget_layout(&self) -> Option<&GadgetLayout> {
        self.gadget_layout.as_ref()
    }
}

impl DeviceBackend for FileBackend {
    fn snapshot(&self) -> Result<DeviceSnapshot> {
        Ok(DeviceSnapshot {
            current: self.current.identity(),
            serial: self.device.serial.clone(),
            seeded: self.device.seeded,
        })
    }

    fn current_model(&self) -> Result<Model> {
        Ok(self.current.clone())
    }

    fn highest_seen_revision(&self, brand_id: &str, model: &str) -> Result<Option<u32>> {
        self.store.highest_seen_revision(brand_id, model)
    }

    fn installed_snaps(&self) -> Result<Vec<InstalledSnap>> {
        Ok(self.device.installed.clone())
    }

    fn changes(&self) -> Result<Vec<ChangeInfo>> {
        Ok(self.device.changes.clone())
    }

    fn system_seed(&self) -> Result<SystemSeed> {
        Ok(self
            .gadget_layout
            .as_ref()
            .map_or(self.device.system_seed, GadgetLayout::system_seed))
    }
}
