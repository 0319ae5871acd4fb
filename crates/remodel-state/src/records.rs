use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use remodel_core::{Model, ModelRef};
use serde::{Deserialize, Serialize};

use crate::fs_utils::write_atomic;
use crate::StateLayout;

/// A recovery system that was installed and seeded on this device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SeededSystem {
    pub system: String,
    pub model: String,
    pub brand_id: String,
    pub revision: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub seed_time: DateTime<Utc>,
}

impl SeededSystem {
    pub fn for_model(label: &str, model: &Model, seed_time: DateTime<Utc>) -> Self {
        Self {
            system: label.to_string(),
            model: model.model.clone(),
            brand_id: model.brand_id.clone(),
            revision: model.revision,
            timestamp: model.timestamp,
            seed_time,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DefaultRecoverySystem {
    pub system: String,
    pub model: String,
    pub brand_id: String,
    pub revision: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeviceStateFile {
    #[serde(default)]
    seeded: bool,
    #[serde(default)]
    seeded_systems: Vec<SeededSystem>,
    #[serde(default)]
    default_recovery_system: Option<DefaultRecoverySystem>,
    /// Highest revision seen per `brand/model`.
    #[serde(default)]
    model_revisions: BTreeMap<String, u32>,
}

/// Read/write access to the persisted device records.
#[derive(Debug, Clone)]
pub struct DeviceStateStore {
    layout: StateLayout,
}

impl DeviceStateStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn seeded(&self) -> Result<bool> {
        Ok(self.load_state()?.seeded)
    }

    pub fn set_seeded(&self, seeded: bool) -> Result<()> {
        let mut state = self.load_state()?;
        state.seeded = seeded;
        self.save_state(&state)
    }

    pub fn seeded_systems(&self) -> Result<Vec<SeededSystem>> {
        Ok(self.load_state()?.seeded_systems)
    }

    pub fn has_seeded_system(&self, label: &str) -> Result<bool> {
        Ok(self
            .load_state()?
            .seeded_systems
            .iter()
            .any(|system| system.system == label))
    }

    /// Appends `system` unless an entry with the same label already exists.
    /// Returns whether a new entry was written.
    pub fn record_seeded_system(&self, system: SeededSystem) -> Result<bool> {
        let mut state = self.load_state()?;
        if state
            .seeded_systems
            .iter()
            .any(|existing| existing.system == system.system)
        {
            return Ok(false);
        }
        state.seeded_systems.push(system);
        self.save_state(&state)?;
        Ok(true)
    }

    pub fn default_recovery_system(&self) -> Result<Option<DefaultRecoverySystem>> {
        Ok(self.load_state()?.default_recovery_system)
    }

    pub fn set_default_recovery_system(&self, system: DefaultRecoverySystem) -> Result<()> {
        let mut state = self.load_state()?;
        state.default_recovery_system = Some(system);
        self.save_state(&state)
    }

    pub fn highest_seen_revision(&self, brand_id: &str, model: &str) -> Result<Option<u32>> {
        Ok(self
            .load_state()?
            .model_revisions
            .get(&format!("{brand_id}/{model}"))
            .copied())
    }

    /// Raises the highest seen revision for the model identity; never lowers it.
    pub fn record_model_revision(&self, model: &ModelRef) -> Result<()> {
        let mut state = self.load_state()?;
        let key = format!("{}/{}", model.brand_id, model.model);
        if let Some(seen) = state.model_revisions.get(&key) {
            if *seen >= model.revision {
                return Ok(());
            }
        }
        state.model_revisions.insert(key, model.revision);
        self.save_state(&state)
    }

    fn load_state(&self) -> Result<DeviceStateFile> {
        let path = self.layout.device_state_path();
        if !path.exists() {
            return Ok(DeviceStateFile::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed reading device state: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed parsing device state: {}", path.display()))
    }

    fn save_state(&self, state: &DeviceStateFile) -> Result<()> {
        let path = self.layout.device_state_path();
        let content = serde_json::to_string_pretty(state)
            .with_context(|| format!("failed serializing device state: {}", path.display()))?;
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("failed writing device state: {}", path.display()))
    }
}
