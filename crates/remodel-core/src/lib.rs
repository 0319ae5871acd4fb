mod model;
mod recovery;
mod snap;
mod validation;

pub use model::{Model, ModelGrade, ModelRef, ModelSnap, ValidationSetMode, ValidationSetRef};
pub use recovery::RecoverySystemSetup;
pub use snap::{
    InstalledSnap, LocalComponent, LocalSnap, Presence, Revision, SideInfo, SnapType,
};
pub use validation::{
    ComponentConstraints, SnapConstraints, ValidationSet, ValidationSetComponent,
    ValidationSetSnap, ValidationSets,
};
