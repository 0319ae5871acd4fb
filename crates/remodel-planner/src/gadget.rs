use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{DeviceContext, RemodelError, SystemSeed};

pub const ROLE_SYSTEM_SEED: &str = "system-seed";
pub const ROLE_SYSTEM_SEED_NULL: &str = "system-seed-null";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GadgetStructure {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GadgetVolume {
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub bootloader: Option<String>,
    #[serde(default, rename = "structure")]
    pub structures: Vec<GadgetStructure>,
}

/// Partition layout a gadget declares, keyed by volume name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GadgetLayout {
    #[serde(default)]
    pub volumes: BTreeMap<String, GadgetVolume>,
}

impl GadgetLayout {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed parsing gadget layout TOML")
    }

    /// Role of the seed partition, if the layout has one.
    pub fn system_seed(&self) -> SystemSeed {
        let roles = self
            .volumes
            .values()
            .flat_map(|volume| volume.structures.iter())
            .filter_map(|structure| structure.role.as_deref());
        let mut seed = SystemSeed::None;
        for role in roles {
            match role {
                ROLE_SYSTEM_SEED => return SystemSeed::SystemSeed,
                ROLE_SYSTEM_SEED_NULL => seed = SystemSeed::SystemSeedNull,
                _ => {}
            }
        }
        seed
    }
}

pub trait GadgetLayoutChecker {
    fn check(&self, current: &GadgetLayout, update: &GadgetLayout) -> Result<()>;
}

impl<F> GadgetLayoutChecker for F
where
    F: Fn(&GadgetLayout, &GadgetLayout) -> Result<()>,
{
    fn check(&self, current: &GadgetLayout, update: &GadgetLayout) -> Result<()> {
        self(current, update)
    }
}

/// Accepts an update only when every existing volume keeps its structures in
/// place with unchanged sizes and roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureLayoutChecker;

impl GadgetLayoutChecker for StructureLayoutChecker {
    fn check(&self, current: &GadgetLayout, update: &GadgetLayout) -> Result<()> {
        for (name, volume) in &current.volumes {
            let new_volume = update.volumes.get(name).ok_or_else(|| {
                anyhow!("incompatible layout change: cannot find volume \"{name}\" in the new gadget")
            })?;
            if volume.structures.len() != new_volume.structures.len() {
                return Err(anyhow!(
                    "incompatible layout change: cannot change the number of structures within volume from {} to {}",
                    volume.structures.len(),
                    new_volume.structures.len()
                ));
            }
            for (index, (from, to)) in volume
                .structures
                .iter()
                .zip(&new_volume.structures)
                .enumerate()
            {
                check_structure(index, from, to)
                    .context("incompatible layout change")?;
            }
        }
        Ok(())
    }
}

fn check_structure(index: usize, from: &GadgetStructure, to: &GadgetStructure) -> Result<()> {
    let problem = if from.size != to.size {
        format!(
            "cannot change structure size from {} to {}",
            from.size, to.size
        )
    } else if from.role != to.role {
        format!(
            "cannot change structure role from {:?} to {:?}",
            from.role.as_deref().unwrap_or_default(),
            to.role.as_deref().unwrap_or_default()
        )
    } else {
        return Ok(());
    };
    Err(anyhow!(
        "incompatible structure #{index} ({:?}) change: {problem}",
        from.name
    ))
}

/// Runs the layout checker against the gadget of a remodel.
///
/// Devices that are not being remodeled and classic targets are accepted
/// without looking at the layouts.
pub fn check_gadget_remodel_compatible(
    ctx: &DeviceContext,
    current: &GadgetLayout,
    update: &GadgetLayout,
    checker: &dyn GadgetLayoutChecker,
) -> Result<(), RemodelError> {
    if !ctx.for_remodeling() || ctx.model().classic {
        return Ok(());
    }
    checker
        .check(current, update)
        .map_err(|err| RemodelError::IncompatibleGadget(format!("{err:#}")))
}
