use std::collections::BTreeSet;

use remodel_core::{InstalledSnap, Model};

use crate::{RemodelError, SnapAction};

/// Checks that every snap brought in by the remodel finds its base and its
/// default content providers on the resulting system.
///
/// All violations are collected and reported together, sorted.
pub fn check_self_contained(
    new_model: &Model,
    installed: &[InstalledSnap],
    actions: &[SnapAction],
) -> Result<(), RemodelError> {
    let present: BTreeSet<&str> = new_model
        .snaps
        .iter()
        .map(|snap| snap.name.as_str())
        .chain(installed.iter().map(|snap| snap.name.as_str()))
        .collect();

    let mut violations = BTreeSet::new();
    for action in actions.iter().filter(|action| action.changes_revision()) {
        if let Some(base) = action.base.as_deref() {
            if !present.contains(base) {
                violations.insert(format!(
                    "cannot use snap \"{}\": base \"{base}\" is missing",
                    action.name
                ));
            }
        }
        for provider in &action.default_providers {
            if !present.contains(provider.as_str()) {
                violations.insert(format!(
                    "cannot use snap \"{}\": default provider \"{provider}\" is missing",
                    action.name
                ));
            }
        }
    }

    if violations.is_empty() {
        return Ok(());
    }
    Err(RemodelError::NotSelfContained {
        violations: violations.into_iter().collect(),
    })
}
