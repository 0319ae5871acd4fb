use std::fs;
use std::io;

use anyhow::{Context, Result};
use remodel_core::Model;

use crate::fs_utils::write_atomic;
use crate::StateLayout;

/// Reads the model the device currently boots with, if one was written.
pub fn read_boot_model(layout: &StateLayout) -> Result<Option<Model>> {
    let path = layout.boot_model_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read boot model: {}", path.display()));
        }
    };
    let model = Model::from_toml_str(&raw)
        .with_context(|| format!("failed to parse boot model: {}", path.display()))?;
    Ok(Some(model))
}

pub fn write_boot_model(layout: &StateLayout, model: &Model) -> Result<()> {
    let path = layout.boot_model_path();
    let content = model.to_toml_string()?;
    write_atomic(&path, content.as_bytes())
        .with_context(|| format!("failed to write boot model: {}", path.display()))
}
