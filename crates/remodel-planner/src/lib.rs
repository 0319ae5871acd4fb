use std::path::PathBuf;

use chrono::NaiveDate;
use remodel_core::{Model, ValidationSet, ValidationSetRef};
use remodel_state::DEFAULT_LABEL_PROBE_LIMIT;
use tracing::info;

mod build;
mod change;
mod conflict;
mod containment;
mod context;
mod device;
mod error;
mod gadget;
mod goals;
mod handlers;
mod local;
mod resolve;
mod tasks;
mod validate;

pub use build::{
    build_task_graph, RemodelPlan, CREATE_RECOVERY_SYSTEM_TASK, FINALIZE_RECOVERY_SYSTEM_TASK,
    PREPARE_REMODELING_TASK, RECOVERY_SYSTEM_SETUP_KEY, RECOVERY_SYSTEM_SETUP_TASK_KEY,
    REQUEST_SERIAL_TASK, SET_MODEL_TASK, UPDATE_GADGET_ASSETS_TASK, UPDATE_GADGET_CMDLINE_TASK,
    UPDATE_KERNEL_ASSETS_TASK,
};
pub use change::{change_summary, Change};
pub use conflict::{
    check_identity_unchanged, check_remodel_conflict, check_snap_conflicts, remodeling,
    CREATE_RECOVERY_SYSTEM_CHANGE_KIND, REMODEL_CHANGE_KIND,
};
pub use containment::check_self_contained;
pub use context::{classify_remodel, DeviceContext, RemodelKind, SystemSeed, DEFAULT_STORE};
pub use device::{ChangeInfo, DeviceBackend, DeviceSnapshot};
pub use error::{ChangeConflictError, RemodelError};
pub use gadget::{
    check_gadget_remodel_compatible, GadgetLayout, GadgetLayoutChecker, GadgetStructure,
    GadgetVolume, StructureLayoutChecker, ROLE_SYSTEM_SEED, ROLE_SYSTEM_SEED_NULL,
};
pub use goals::{GoalOptions, GoalTarget, SnapGoals, SnapInfo};
pub use handlers::{no_longer_required, prepare_remodeling_tasks};
pub use local::LocalFiles;
pub use resolve::{
    resolve_snap_actions, ActionKind, ComponentAction, ComponentActionKind, SnapAction,
};
pub use tasks::{Task, TaskEdge, TaskGraph, TaskId, TaskSet};
pub use validate::{validate_transition, TransitionFacts};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemodelOptions {
    pub offline: bool,
    pub local: LocalFiles,
    /// Directory holding the recovery systems of the seed partition.
    pub systems_dir: PathBuf,
    /// Date recovery system labels are derived from.
    pub today: NaiveDate,
    pub label_probe_limit: u32,
    pub allow_uc20_upgrade: bool,
}

impl RemodelOptions {
    pub fn new(systems_dir: impl Into<PathBuf>, today: NaiveDate) -> Self {
        Self {
            offline: false,
            local: LocalFiles::default(),
            systems_dir: systems_dir.into(),
            today,
            label_probe_limit: DEFAULT_LABEL_PROBE_LIMIT,
            allow_uc20_upgrade: false,
        }
    }
}

/// Plans a remodel of the device to `new_model`.
///
/// Nothing on the device is modified: either an error comes back or a
/// change whose tasks, once run by the engine, bring the device to the new
/// model. Every task is tagged with `change_id`.
pub fn remodel<B, G, F>(
    backend: &B,
    goals: &mut G,
    mut fetch_validation_set: F,
    new_model: Model,
    change_id: &str,
    options: &RemodelOptions,
) -> Result<Change, RemodelError>
where
    B: DeviceBackend + ?Sized,
    G: SnapGoals + ?Sized,
    F: FnMut(&ValidationSetRef) -> anyhow::Result<ValidationSet>,
{
    let before = backend.snapshot()?;
    let current = backend.current_model()?;
    let facts = TransitionFacts {
        seeded: before.seeded,
        has_serial: before.serial.is_some(),
        offline: options.offline,
        has_local_files: !options.local.is_empty(),
        highest_seen_revision: backend
            .highest_seen_revision(&new_model.brand_id, &new_model.model)?,
        allow_uc20_upgrade: options.allow_uc20_upgrade,
    };
    validate_transition(&current, &new_model, &facts)?;

    let kind = classify_remodel(&current, &new_model);
    check_remodel_conflict(&backend.changes()?, kind)?;
    info!(change_id, kind = %kind, from = %current, to = %new_model, "planning remodel");

    let (graph, recovery_system_label) = if kind == RemodelKind::ReregRemodel {
        (build::rereg_task_graph(change_id)?, None)
    } else {
        options.local.check()?;
        let ctx = DeviceContext::for_remodel(
            current.clone(),
            new_model.clone(),
            backend.system_seed()?,
        );
        let plan = build::plan_snap_changes(
            backend,
            goals,
            &mut fetch_validation_set,
            &ctx,
            change_id,
            options,
        )?;

        let changes = backend.changes()?;
        check_remodel_conflict(&changes, kind)?;
        check_snap_conflicts(&changes, plan.planned_snaps())?;
        (plan.graph, plan.recovery_system_label)
    };

    check_identity_unchanged(&before, &backend.snapshot()?)?;
    info!(change_id, tasks = graph.len(), "remodel planned");
    Ok(Change::new(
        change_id,
        kind,
        current,
        new_model,
        recovery_system_label,
        graph,
    ))
}

#[cfg(test)]
mod tests;
