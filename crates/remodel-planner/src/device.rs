use anyhow::Result;
use remodel_core::{InstalledSnap, Model, ModelRef};
use serde::{Deserialize, Serialize};

use crate::SystemSeed;

/// Point-in-time view of the device identity. Read once for validation and
/// again after planning to detect concurrent remodels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceSnapshot {
    pub current: ModelRef,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub seeded: bool,
}

/// A change known to the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChangeInfo {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub ready: bool,
    /// Snaps the change operates on.
    #[serde(default)]
    pub snaps: Vec<String>,
}

pub trait DeviceBackend {
    fn snapshot(&self) -> Result<DeviceSnapshot>;

    fn current_model(&self) -> Result<Model>;

    /// Highest model revision ever applied for this brand and model.
    fn highest_seen_revision(&self, brand_id: &str, model: &str) -> Result<Option<u32>>;

    fn installed_snaps(&self) -> Result<Vec<InstalledSnap>>;

    fn changes(&self) -> Result<Vec<ChangeInfo>>;

    fn system_seed(&self) -> Result<SystemSeed>;
}
