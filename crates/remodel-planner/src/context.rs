use std::fmt;

use remodel_core::{Model, ModelRef};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STORE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemodelKind {
    /// Same brand, model and store; only the model revision or content changes.
    UpdateRemodel,
    StoreSwitchRemodel,
    /// Brand or model name changes and the device must re-register.
    ReregRemodel,
}

impl RemodelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpdateRemodel => "revision update remodel",
            Self::StoreSwitchRemodel => "store switch remodel",
            Self::ReregRemodel => "re-registration remodel",
        }
    }
}

impl fmt::Display for RemodelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_remodel(current: &Model, new: &Model) -> RemodelKind {
    if current.brand_id != new.brand_id || current.model != new.model {
        return RemodelKind::ReregRemodel;
    }
    if current.store != new.store {
        return RemodelKind::StoreSwitchRemodel;
    }
    RemodelKind::UpdateRemodel
}

/// Role the gadget gives the seed partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemSeed {
    /// A real seed partition that holds recovery systems.
    SystemSeed,
    /// Hybrid layout without recovery systems.
    SystemSeedNull,
    #[default]
    None,
}

/// Device view handed to every collaborator while a remodel is planned.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceContext {
    old_model: Model,
    new_model: Model,
    remodeling: bool,
    kind: RemodelKind,
    store: Option<String>,
    system_seed: SystemSeed,
}

impl DeviceContext {
    pub fn for_remodel(old_model: Model, new_model: Model, system_seed: SystemSeed) -> Self {
        let kind = classify_remodel(&old_model, &new_model);
        let store = match kind {
            RemodelKind::UpdateRemodel => None,
            RemodelKind::StoreSwitchRemodel | RemodelKind::ReregRemodel => Some(
                new_model
                    .store
                    .clone()
                    .unwrap_or_else(|| DEFAULT_STORE.to_string()),
            ),
        };
        Self {
            old_model,
            new_model,
            remodeling: true,
            kind,
            store,
            system_seed,
        }
    }

    /// Context of a device that is not being remodeled.
    pub fn ground(model: Model, system_seed: SystemSeed) -> Self {
        Self {
            old_model: model.clone(),
            new_model: model,
            remodeling: false,
            kind: RemodelKind::UpdateRemodel,
            store: None,
            system_seed,
        }
    }

    pub fn for_remodeling(&self) -> bool {
        self.remodeling
    }

    /// The model the device is moving to.
    pub fn model(&self) -> &Model {
        &self.new_model
    }

    pub fn old_model(&self) -> &Model {
        &self.old_model
    }

    pub fn kind(&self) -> RemodelKind {
        self.kind
    }

    pub fn store(&self) -> Option<&str> {
        self.store.as_deref()
    }

    pub fn system_seed(&self) -> SystemSeed {
        self.system_seed
    }

    pub fn identity(&self) -> ModelRef {
        self.new_model.identity()
    }

    /// Whether the new model needs a new recovery system created on the seed.
    pub fn needs_recovery_system(&self) -> bool {
        self.remodeling
            && self.new_model.is_uc20()
            && self.system_seed == SystemSeed::SystemSeed
    }
}
