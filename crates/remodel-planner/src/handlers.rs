use std::collections::BTreeSet;

use remodel_core::{InstalledSnap, Model, Presence, SnapType, ValidationSet, ValidationSetRef};

use crate::build::plan_snap_changes;
use crate::{
    check_snap_conflicts, Change, ChangeInfo, DeviceBackend, DeviceContext, RemodelError,
    RemodelOptions, RemodelPlan, SnapGoals,
};

/// Computes the snap tasks of a re-registration remodel once the device has
/// its new serial. The engine splices the returned graph into `change`
/// after the prepare-remodeling task.
pub fn prepare_remodeling_tasks<B, G, F>(
    backend: &B,
    goals: &mut G,
    mut fetch_validation_set: F,
    change: &Change,
    options: &RemodelOptions,
) -> Result<RemodelPlan, RemodelError>
where
    B: DeviceBackend + ?Sized,
    G: SnapGoals + ?Sized,
    F: FnMut(&ValidationSetRef) -> anyhow::Result<ValidationSet>,
{
    let ctx = DeviceContext::for_remodel(
        change.current_model.clone(),
        change.new_model.clone(),
        backend.system_seed()?,
    );
    let plan = plan_snap_changes(
        backend,
        goals,
        &mut fetch_validation_set,
        &ctx,
        &change.id,
        options,
    )?;

    let others: Vec<ChangeInfo> = backend
        .changes()?
        .into_iter()
        .filter(|other| other.id != change.id)
        .collect();
    check_snap_conflicts(&others, plan.planned_snaps())?;
    Ok(plan)
}

/// Installed snaps whose required flag must be dropped because the new
/// model no longer requires them. Only apps, bases and kernels qualify.
pub fn no_longer_required(new_model: &Model, installed: &[InstalledSnap]) -> Vec<String> {
    let still_required: BTreeSet<&str> = new_model
        .snaps
        .iter()
        .filter(|snap| snap.presence == Presence::Required)
        .map(|snap| snap.name.as_str())
        .collect();

    let mut names: Vec<String> = installed
        .iter()
        .filter(|snap| snap.required)
        .filter(|snap| {
            matches!(
                snap.snap_type,
                SnapType::App | SnapType::Base | SnapType::Kernel
            )
        })
        .filter(|snap| !still_required.contains(snap.name.as_str()))
        .map(|snap| snap.name.clone())
        .collect();
    names.sort();
    names
}
