mod finalizer;
mod fs_utils;
mod labels;
mod layout;
mod model_file;
mod modeenv;
mod records;
mod reseal;

pub use finalizer::{
    FinalizeError, FinalizeRequest, FinalizeStage, SetModelFinalizer, DEFAULT_RESEAL_ATTEMPTS,
};
pub use labels::{pick_recovery_system_label, DEFAULT_LABEL_PROBE_LIMIT};
pub use layout::StateLayout;
pub use model_file::{read_boot_model, write_boot_model};
pub use modeenv::{read_modeenv, write_modeenv, Modeenv};
pub use records::{DefaultRecoverySystem, DeviceStateStore, SeededSystem};
pub use reseal::{ResealRequest, Resealer};
