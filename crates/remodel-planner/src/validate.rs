use remodel_core::Model;

use crate::{classify_remodel, RemodelError, RemodelKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFacts {
    pub seeded: bool,
    pub has_serial: bool,
    pub offline: bool,
    pub has_local_files: bool,
    /// Highest revision ever seen for the new model's identity.
    pub highest_seen_revision: Option<u32>,
    pub allow_uc20_upgrade: bool,
}

/// Checks whether moving from `current` to `new` is allowed at all.
/// Returns the first rule that fails.
pub fn validate_transition(
    current: &Model,
    new: &Model,
    facts: &TransitionFacts,
) -> Result<(), RemodelError> {
    if !facts.seeded {
        return Err(RemodelError::NotSeeded);
    }
    if current.architecture != new.architecture {
        return Err(RemodelError::ArchitectureChange);
    }

    match (current.is_uc20(), new.is_uc20()) {
        (false, true) if !facts.allow_uc20_upgrade => return Err(RemodelError::PreUc20ToUc20),
        (true, false) => return Err(RemodelError::Uc20ToPreUc20),
        _ => {}
    }

    if !current.classic && !new.classic {
        match (current.has_base(), new.has_base()) {
            (false, true) if !new.is_uc20() => return Err(RemodelError::CoreToBases),
            (true, false) => return Err(RemodelError::BasesToCore),
            _ => {}
        }
    }

    match (current.classic, new.classic) {
        (true, false) => return Err(RemodelError::ClassicToCore),
        (false, true) => return Err(RemodelError::CoreToClassic),
        (true, true) if !(current.is_hybrid_classic() && new.is_hybrid_classic()) => {
            return Err(RemodelError::NonHybridClassic);
        }
        _ => {}
    }

    if new.grade < current.grade {
        return Err(RemodelError::GradeDowngrade {
            from: current.grade,
            to: new.grade,
        });
    }

    let kind = classify_remodel(current, new);
    let floor = match kind {
        RemodelKind::ReregRemodel => facts.highest_seen_revision,
        RemodelKind::UpdateRemodel | RemodelKind::StoreSwitchRemodel => Some(
            facts
                .highest_seen_revision
                .map_or(current.revision, |seen| seen.max(current.revision)),
        ),
    };
    if let Some(floor) = floor {
        if new.revision < floor {
            return Err(RemodelError::OlderRevision {
                brand_id: new.brand_id.clone(),
                model: new.model.clone(),
                revision: new.revision,
                current: floor,
            });
        }
    }

    if kind != RemodelKind::ReregRemodel && !facts.has_serial {
        return Err(RemodelError::NoSerial);
    }

    if facts.offline && kind == RemodelKind::ReregRemodel {
        return Err(RemodelError::OfflineIdentityChange);
    }
    if !facts.offline && facts.has_local_files {
        return Err(RemodelError::LocalFilesOnline);
    }
    Ok(())
}
