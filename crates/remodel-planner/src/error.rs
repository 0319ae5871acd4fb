use remodel_core::{ModelGrade, Revision};
use thiserror::Error;

/// Another change already holds the remodel slot or one of the snaps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ChangeConflictError {
    pub change_kind: Option<String>,
    pub change_id: Option<String>,
    pub message: String,
}

impl ChangeConflictError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            change_kind: None,
            change_id: None,
            message: message.into(),
        }
    }

    pub fn with_change(mut self, kind: &str, id: &str) -> Self {
        self.change_kind = Some(kind.to_string());
        self.change_id = Some(id.to_string());
        self
    }
}

fn bullet_list(violations: &[String]) -> String {
    violations
        .iter()
        .map(|violation| format!("\n - {violation}"))
        .collect()
}

/// Every way a remodel can be refused before any state is touched.
#[derive(Debug, Error)]
pub enum RemodelError {
    #[error("cannot remodel until fully seeded")]
    NotSeeded,

    #[error("cannot remodel to different architectures yet")]
    ArchitectureChange,

    #[error("cannot remodel from pre-UC20 to UC20+ models")]
    PreUc20ToUc20,

    #[error("cannot remodel from UC20+ to pre-UC20 models")]
    Uc20ToPreUc20,

    #[error("cannot remodel from core to bases yet")]
    CoreToBases,

    #[error("cannot remodel from bases to core")]
    BasesToCore,

    #[error("cannot remodel from classic to non-classic models")]
    ClassicToCore,

    #[error("cannot remodel from non-classic to classic models")]
    CoreToClassic,

    #[error("cannot remodel classic models without kernel and gadget snaps")]
    NonHybridClassic,

    #[error("cannot remodel from grade {from} to grade {to}")]
    GradeDowngrade { from: ModelGrade, to: ModelGrade },

    #[error(
        "cannot remodel to older revision {revision} of model {brand_id}/{model} (current revision {current})"
    )]
    OlderRevision {
        brand_id: String,
        model: String,
        revision: u32,
        current: u32,
    },

    #[error("cannot remodel without a serial")]
    NoSerial,

    #[error("cannot remodel offline to different brand ID or model")]
    OfflineIdentityChange,

    #[error("cannot do an online remodel with provided local snaps or components")]
    LocalFilesOnline,

    #[error(transparent)]
    Conflict(#[from] ChangeConflictError),

    #[error("no snap file provided for \"{name}\"")]
    NoSnapFile { name: String },

    #[error("no component file provided for \"{reference}\"")]
    NoComponentFile { reference: String },

    #[error(
        "snap \"{name}\" is installed at revision {installed} but validation sets require revision {required}, which is not available offline"
    )]
    WrongRevision {
        name: String,
        installed: Revision,
        required: Revision,
    },

    #[error(
        "cannot match unasserted local snap \"{name}\" against revision {required} required by validation sets"
    )]
    UnassertedRevision { name: String, required: Revision },

    #[error("local snap \"{name}\" has revision {provided} but validation sets require revision {required}")]
    LocalRevisionMismatch {
        name: String,
        provided: Revision,
        required: Revision,
    },

    #[error("snap \"{name}\" required by validation sets is missing from the new model")]
    RequiredSnapMissing { name: String },

    #[error("snap \"{name}\" is required by the new model but invalid in validation sets")]
    InvalidSnapRequired { name: String },

    #[error("local snap file \"{path}\" is not a regular file")]
    LocalFileInvalid { path: String },

    #[error("local snap file \"{path}\" does not match expected digest")]
    LocalFileDigestMismatch { path: String },

    #[error("cannot use more than one local file for \"{name}\"")]
    DuplicateLocalFile { name: String },

    #[error("cannot remodel to model that is not self contained:{}", bullet_list(.violations))]
    NotSelfContained { violations: Vec<String> },

    #[error("cannot remodel to an incompatible gadget: {0}")]
    IncompatibleGadget(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RemodelError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
