use std::collections::BTreeSet;

use crate::{ChangeConflictError, ChangeInfo, DeviceSnapshot, RemodelKind};

pub const REMODEL_CHANGE_KIND: &str = "remodel";
pub const CREATE_RECOVERY_SYSTEM_CHANGE_KIND: &str = "create-recovery-system";

/// Whether a remodel is still in flight.
pub fn remodeling(changes: &[ChangeInfo]) -> bool {
    changes
        .iter()
        .any(|change| !change.ready && change.kind == REMODEL_CHANGE_KIND)
}

/// Refuses to start a remodel while another change holds the remodel slot.
pub fn check_remodel_conflict(
    changes: &[ChangeInfo],
    kind: RemodelKind,
) -> Result<(), ChangeConflictError> {
    let pending: Vec<&ChangeInfo> = changes.iter().filter(|change| !change.ready).collect();
    for change in &pending {
        if change.kind == REMODEL_CHANGE_KIND {
            return Err(
                ChangeConflictError::new("cannot start remodel, clashing with concurrent one")
                    .with_change(&change.kind, &change.id),
            );
        }
        if change.kind == CREATE_RECOVERY_SYSTEM_CHANGE_KIND {
            return Err(ChangeConflictError::new(
                "creating recovery system in progress, no other changes allowed until this is done",
            )
            .with_change(&change.kind, &change.id));
        }
    }

    if kind == RemodelKind::ReregRemodel {
        if let Some(change) = pending.first() {
            return Err(ChangeConflictError::new(
                "cannot start complete remodel, other changes are in progress",
            )
            .with_change(&change.kind, &change.id));
        }
    }
    Ok(())
}

/// Detects a remodel that completed while this one was being planned.
pub fn check_identity_unchanged(
    before: &DeviceSnapshot,
    after: &DeviceSnapshot,
) -> Result<(), ChangeConflictError> {
    if before.current != after.current {
        return Err(ChangeConflictError::new(format!(
            "cannot start remodel, clashing with concurrent remodel to {}",
            after.current
        )));
    }
    Ok(())
}

/// Refuses snaps that another pending change is already operating on.
pub fn check_snap_conflicts<'a>(
    changes: &[ChangeInfo],
    snaps: impl IntoIterator<Item = &'a str>,
) -> Result<(), ChangeConflictError> {
    let wanted: BTreeSet<&str> = snaps.into_iter().collect();
    for change in changes.iter().filter(|change| !change.ready) {
        if let Some(snap) = change
            .snaps
            .iter()
            .find(|snap| wanted.contains(snap.as_str()))
        {
            return Err(ChangeConflictError::new(format!(
                "snap \"{snap}\" has \"{}\" change in progress",
                change.kind
            ))
            .with_change(&change.kind, &change.id));
        }
    }
    Ok(())
}
