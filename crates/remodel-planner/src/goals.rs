use anyhow::Result;
use remodel_core::{LocalSnap, Revision, SnapType};
use serde::{Deserialize, Serialize};

use crate::{ComponentAction, DeviceContext, TaskGraph, TaskSet};

/// What a goal resolver is asked to bring onto the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GoalTarget {
    pub name: String,
    pub snap_type: SnapType,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub revision: Option<Revision>,
    #[serde(default)]
    pub local: Option<LocalSnap>,
    #[serde(default)]
    pub components: Vec<ComponentAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GoalOptions {
    /// Mark the snap as required by the model once installed.
    pub required: bool,
    /// Do not refresh prerequisites again as part of this goal.
    pub no_re_refresh: bool,
    /// Correlation id of the change the tasks are produced for.
    pub from_change: String,
}

/// Store facts about a snap that is not on the device yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapInfo {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub default_providers: Vec<String>,
}

/// Package operations that turn a target into tasks. Each call adds its
/// tasks to `graph` and returns them as a set with its edges marked.
pub trait SnapGoals {
    fn snap_info(&mut self, ctx: &DeviceContext, target: &GoalTarget) -> Result<SnapInfo>;

    fn install(
        &mut self,
        graph: &mut TaskGraph,
        ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> Result<TaskSet>;

    fn update(
        &mut self,
        graph: &mut TaskGraph,
        ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> Result<TaskSet>;

    fn switch_channel(
        &mut self,
        graph: &mut TaskGraph,
        ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> Result<TaskSet>;

    /// Re-links a revision that is still cached on the device.
    fn link_existing(
        &mut self,
        graph: &mut TaskGraph,
        ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> Result<TaskSet>;
}
