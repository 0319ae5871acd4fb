use remodel_core::{Model, ModelRef};
use remodel_state::FinalizeRequest;
use serde::{Deserialize, Serialize};

use crate::{RemodelKind, Task, TaskGraph, REMODEL_CHANGE_KIND};

/// A remodel handed to the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Change {
    pub id: String,
    pub kind: String,
    pub summary: String,
    pub remodel_kind: RemodelKind,
    pub current_model: Model,
    pub new_model: Model,
    #[serde(default)]
    pub recovery_system_label: Option<String>,
    pub graph: TaskGraph,
}

pub fn change_summary(current: &ModelRef, new: &ModelRef) -> String {
    if current.same_identity(new) {
        format!(
            "Refresh model assertion from revision {} to {}",
            current.revision, new.revision
        )
    } else {
        format!("Remodel device to {new}")
    }
}

impl Change {
    pub fn new(
        id: impl Into<String>,
        remodel_kind: RemodelKind,
        current_model: Model,
        new_model: Model,
        recovery_system_label: Option<String>,
        graph: TaskGraph,
    ) -> Self {
        Self {
            id: id.into(),
            kind: REMODEL_CHANGE_KIND.to_string(),
            summary: change_summary(&current_model.identity(), &new_model.identity()),
            remodel_kind,
            current_model,
            new_model,
            recovery_system_label,
            graph,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        self.graph.tasks()
    }

    pub fn finalize_request(&self) -> FinalizeRequest {
        FinalizeRequest {
            change_id: self.id.clone(),
            current: self.current_model.clone(),
            new: self.new_model.clone(),
            recovery_system_label: self.recovery_system_label.clone(),
        }
    }
}
