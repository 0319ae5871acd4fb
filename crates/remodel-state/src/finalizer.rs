use std::fmt;
use std::fs;
use std::io;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use remodel_core::{Model, ModelRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs_utils::write_atomic;
use crate::{
    read_boot_model, read_modeenv, write_boot_model, write_modeenv, DefaultRecoverySystem,
    DeviceStateStore, ResealRequest, Resealer, SeededSystem, StateLayout,
};

pub const DEFAULT_RESEAL_ATTEMPTS: u32 = 3;

/// Progress of the set-model commit. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalizeStage {
    Pending,
    Promoted,
    ResealedDual,
    ModelWritten,
    ResealedSingle,
    Done,
}

impl FinalizeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Promoted => "promoted",
            Self::ResealedDual => "resealed-dual",
            Self::ModelWritten => "model-written",
            Self::ResealedSingle => "resealed-single",
            Self::Done => "done",
        }
    }

    /// Past this stage the new model is on disk and nothing is rolled back.
    pub fn is_committed(self) -> bool {
        self >= Self::ModelWritten
    }
}

impl fmt::Display for FinalizeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("cannot finalize remodel at stage {stage}: {source:#}")]
    Storage {
        stage: FinalizeStage,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot finalize remodel: boot model {found} is neither {current} nor {new}")]
    UnexpectedBootModel {
        found: ModelRef,
        current: ModelRef,
        new: ModelRef,
    },
}

/// Everything the set-model task needs to commit a remodel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct FinalizeRequest {
    pub change_id: String,
    pub current: Model,
    pub new: Model,
    #[serde(default)]
    pub recovery_system_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FinalizeStateFile {
    version: u32,
    change_id: String,
    stage: FinalizeStage,
    updated_at: DateTime<Utc>,
}

pub struct SetModelFinalizer<R> {
    layout: StateLayout,
    store: DeviceStateStore,
    resealer: R,
    reseal_attempts: u32,
}

impl<R: Resealer> SetModelFinalizer<R> {
    pub fn new(layout: StateLayout, resealer: R) -> Self {
        Self {
            store: DeviceStateStore::new(layout.clone()),
            layout,
            resealer,
            reseal_attempts: DEFAULT_RESEAL_ATTEMPTS,
        }
    }

    pub fn with_reseal_attempts(mut self, attempts: u32) -> Self {
        self.reseal_attempts = attempts.max(1);
        self
    }

    pub fn into_resealer(self) -> R {
        self.resealer
    }

    /// Drives the commit to completion, resuming from whatever stage the
    /// persisted facts show. Reseal failures are appended to `log` and never
    /// returned.
    pub fn run(
        &mut self,
        request: &FinalizeRequest,
        log: &mut Vec<String>,
    ) -> Result<FinalizeStage, FinalizeError> {
        let mut stage = self.derive_stage(request)?;
        info!(change_id = %request.change_id, stage = %stage, "finalizing remodel");

        while stage != FinalizeStage::Done {
            let next = self
                .advance(stage, request, log)
                .map_err(|source| FinalizeError::Storage { stage, source })?;
            self.save_stage(&request.change_id, next)
                .map_err(|source| FinalizeError::Storage { stage: next, source })?;
            debug!(change_id = %request.change_id, from = %stage, to = %next, "finalize stage reached");
            stage = next;
        }
        Ok(stage)
    }

    /// Works out the current stage from the boot model file, the modeenv and
    /// the device records, using the persisted stage only where those facts
    /// cannot tell stages apart.
    pub fn derive_stage(&self, request: &FinalizeRequest) -> Result<FinalizeStage, FinalizeError> {
        let storage = |source| FinalizeError::Storage {
            stage: FinalizeStage::Pending,
            source,
        };
        let persisted = self.load_stage(&request.change_id).map_err(storage)?;
        if persisted == Some(FinalizeStage::Done) {
            return Ok(FinalizeStage::Done);
        }

        let current = request.current.identity();
        let new = request.new.identity();
        let boot_managed = request.new.is_uc20();
        let modeenv = if boot_managed {
            read_modeenv(&self.layout).map_err(storage)?
        } else {
            Default::default()
        };

        // Compared in full: a store switch keeps brand, name and revision.
        // Identical old and new models leave it to the persisted stage.
        let model_written = match read_boot_model(&self.layout).map_err(storage)? {
            Some(found) if found == request.new => {
                request.new != request.current || persisted >= Some(FinalizeStage::ModelWritten)
            }
            Some(found) if found != request.current => {
                return Err(FinalizeError::UnexpectedBootModel {
                    found: found.identity(),
                    current,
                    new,
                });
            }
            _ => false,
        };

        if model_written {
            if let Some(label) = request.recovery_system_label.as_deref() {
                if self.label_recorded(label).map_err(storage)?
                    && self.revision_recorded(&new).map_err(storage)?
                {
                    return Ok(FinalizeStage::Done);
                }
            }
            return if boot_managed && modeenv.try_model.is_some() {
                Ok(FinalizeStage::ModelWritten)
            } else {
                Ok(FinalizeStage::ResealedSingle)
            };
        }

        let promoted = match request.recovery_system_label.as_deref() {
            Some(label) if boot_managed => modeenv.is_good_recovery_system(label),
            _ => persisted.is_some(),
        };
        if !promoted {
            return Ok(FinalizeStage::Pending);
        }
        let try_set = !boot_managed || modeenv.try_model.as_ref() == Some(&new);
        if try_set && persisted >= Some(FinalizeStage::ResealedDual) {
            Ok(FinalizeStage::ResealedDual)
        } else {
            Ok(FinalizeStage::Promoted)
        }
    }

    fn advance(
        &mut self,
        stage: FinalizeStage,
        request: &FinalizeRequest,
        log: &mut Vec<String>,
    ) -> Result<FinalizeStage> {
        let boot_managed = request.new.is_uc20();
        let current = request.current.identity();
        let new = request.new.identity();

        match stage {
            FinalizeStage::Pending => {
                if let (true, Some(label)) = (boot_managed, request.recovery_system_label.as_deref()) {
                    let mut modeenv = read_modeenv(&self.layout)?;
                    if modeenv.promote_recovery_system(label) {
                        write_modeenv(&self.layout, &modeenv)?;
                    }
                    info!(change_id = %request.change_id, label, "promoted tried recovery system");
                }
                Ok(FinalizeStage::Promoted)
            }
            FinalizeStage::Promoted => {
                if boot_managed {
                    let mut modeenv = read_modeenv(&self.layout)?;
                    modeenv.try_model = Some(new.clone());
                    write_modeenv(&self.layout, &modeenv)?;
                    self.reseal_with_retries(
                        &request.change_id,
                        stage,
                        &ResealRequest::DualModel { current, next: new },
                        log,
                    );
                }
                Ok(FinalizeStage::ResealedDual)
            }
            FinalizeStage::ResealedDual => {
                write_boot_model(&self.layout, &request.new)?;
                info!(change_id = %request.change_id, model = %new, "new model written to boot partition");
                Ok(FinalizeStage::ModelWritten)
            }
            FinalizeStage::ModelWritten => {
                if boot_managed {
                    self.reseal_with_retries(
                        &request.change_id,
                        stage,
                        &ResealRequest::NewModelOnly { model: new.clone() },
                        log,
                    );
                    let mut modeenv = read_modeenv(&self.layout)?;
                    modeenv.model = Some(new);
                    modeenv.try_model = None;
                    write_modeenv(&self.layout, &modeenv)?;
                }
                Ok(FinalizeStage::ResealedSingle)
            }
            FinalizeStage::ResealedSingle => {
                self.record_new_system(request)?;
                Ok(FinalizeStage::Done)
            }
            FinalizeStage::Done => Ok(FinalizeStage::Done),
        }
    }

    fn record_new_system(&self, request: &FinalizeRequest) -> Result<()> {
        self.store.record_model_revision(&request.new.identity())?;
        let now = Utc::now();
        if let Some(label) = request.recovery_system_label.as_deref() {
            self.store
                .record_seeded_system(SeededSystem::for_model(label, &request.new, now))
                .context("cannot record a new seeded system")?;
            self.store.set_default_recovery_system(DefaultRecoverySystem {
                system: label.to_string(),
                model: request.new.model.clone(),
                brand_id: request.new.brand_id.clone(),
                revision: request.new.revision,
                timestamp: request.new.timestamp,
                time: now,
            })?;
        }
        Ok(())
    }

    fn revision_recorded(&self, model: &ModelRef) -> Result<bool> {
        Ok(self
            .store
            .highest_seen_revision(&model.brand_id, &model.model)?
            .is_some_and(|seen| seen >= model.revision))
    }

    fn label_recorded(&self, label: &str) -> Result<bool> {
        let default_matches = self
            .store
            .default_recovery_system()?
            .is_some_and(|system| system.system == label);
        Ok(default_matches && self.store.has_seeded_system(label)?)
    }

    fn reseal_with_retries(
        &mut self,
        change_id: &str,
        stage: FinalizeStage,
        request: &ResealRequest,
        log: &mut Vec<String>,
    ) {
        let mut last_err = None;
        for attempt in 1..=self.reseal_attempts.max(1) {
            match self.resealer.reseal(request) {
                Ok(()) => {
                    debug!(change_id, stage = %stage, attempt, "resealed boot keys for {request}");
                    return;
                }
                Err(err) => {
                    debug!(change_id, stage = %stage, attempt, "reseal attempt failed: {err:#}");
                    last_err = Some(err);
                }
            }
        }

        if let Some(err) = last_err {
            let message = format!("cannot reseal boot keys for {request}: {err:#}");
            warn!(change_id, stage = %stage, committed = stage.is_committed(), "{message}");
            log.push(message);
        }
    }

    fn load_stage(&self, change_id: &str) -> Result<Option<FinalizeStage>> {
        let path = self.layout.finalize_state_path(change_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading finalize state: {}", path.display())
                });
            }
        };
        let state: FinalizeStateFile = serde_json::from_str(&content)
            .with_context(|| format!("failed parsing finalize state: {}", path.display()))?;
        Ok(Some(state.stage))
    }

    fn save_stage(&self, change_id: &str, stage: FinalizeStage) -> Result<()> {
        let path = self.layout.finalize_state_path(change_id);
        let state = FinalizeStateFile {
            version: 1,
            change_id: change_id.to_string(),
            stage,
            updated_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&state)
            .with_context(|| format!("failed serializing finalize state: {}", path.display()))?;
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("failed writing finalize state: {}", path.display()))
    }

    pub fn stage(&self, change_id: &str) -> Result<Option<FinalizeStage>> {
        self.load_stage(change_id)
    }
}
