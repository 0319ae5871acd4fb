use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Data carried by the create-recovery-system task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RecoverySystemSetup {
    pub label: String,
    pub directory: PathBuf,
    /// Ids of tasks whose snap setup feeds the new recovery system.
    #[serde(default)]
    pub snap_setup_tasks: Vec<String>,
    #[serde(default)]
    pub test_system: bool,
    #[serde(default)]
    pub mark_current: bool,
}

impl RecoverySystemSetup {
    pub fn new(label: impl Into<String>, systems_dir: &std::path::Path) -> Self {
        let label = label.into();
        Self {
            directory: systems_dir.join(&label),
            label,
            snap_setup_tasks: Vec::new(),
            test_system: true,
            mark_current: true,
        }
    }
}
