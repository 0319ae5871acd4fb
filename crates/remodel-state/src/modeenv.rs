use std::fs;
use std::io;

use anyhow::{anyhow, Context, Result};
use remodel_core::{ModelGrade, ModelRef};

use crate::fs_utils::write_atomic;
use crate::StateLayout;

/// Boot bookkeeping shared with the bootloader during the commit window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modeenv {
    pub mode: String,
    pub recovery_system: Option<String>,
    pub current_recovery_systems: Vec<String>,
    pub good_recovery_systems: Vec<String>,
    pub model: Option<ModelRef>,
    pub try_model: Option<ModelRef>,
}

impl Modeenv {
    pub fn is_good_recovery_system(&self, label: &str) -> bool {
        self.good_recovery_systems.iter().any(|system| system == label)
    }

    /// Marks `label` as current and good. Returns whether anything changed.
    pub fn promote_recovery_system(&mut self, label: &str) -> bool {
        let mut changed = false;
        if !self.current_recovery_systems.iter().any(|system| system == label) {
            self.current_recovery_systems.push(label.to_string());
            changed = true;
        }
        if !self.is_good_recovery_system(label) {
            self.good_recovery_systems.push(label.to_string());
            changed = true;
        }
        changed
    }
}

pub fn read_modeenv(layout: &StateLayout) -> Result<Modeenv> {
    let path = layout.modeenv_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Modeenv::default()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read modeenv: {}", path.display()));
        }
    };
    parse_modeenv(&raw).with_context(|| format!("failed to parse modeenv: {}", path.display()))
}

pub fn write_modeenv(layout: &StateLayout, modeenv: &Modeenv) -> Result<()> {
    let path = layout.modeenv_path();
    write_atomic(&path, serialize_modeenv(modeenv).as_bytes())
        .with_context(|| format!("failed to write modeenv: {}", path.display()))
}

fn push_model(payload: &mut String, prefix: &str, model: &ModelRef) {
    payload.push_str(&format!("{prefix}model={}/{}\n", model.brand_id, model.model));
    payload.push_str(&format!("{prefix}grade={}\n", model.grade));
    payload.push_str(&format!("{prefix}model_revision={}\n", model.revision));
}

pub(crate) fn serialize_modeenv(modeenv: &Modeenv) -> String {
    let mut payload = String::new();
    payload.push_str(&format!("mode={}\n", modeenv.mode));
    if let Some(recovery_system) = &modeenv.recovery_system {
        payload.push_str(&format!("recovery_system={recovery_system}\n"));
    }
    if !modeenv.current_recovery_systems.is_empty() {
        payload.push_str(&format!(
            "current_recovery_systems={}\n",
            modeenv.current_recovery_systems.join(",")
        ));
    }
    if !modeenv.good_recovery_systems.is_empty() {
        payload.push_str(&format!(
            "good_recovery_systems={}\n",
            modeenv.good_recovery_systems.join(",")
        ));
    }
    if let Some(model) = &modeenv.model {
        push_model(&mut payload, "", model);
    }
    if let Some(try_model) = &modeenv.try_model {
        push_model(&mut payload, "try_", try_model);
    }
    payload
}

#[derive(Default)]
struct PartialModel {
    identity: Option<(String, String)>,
    grade: Option<ModelGrade>,
    revision: Option<u32>,
}

impl PartialModel {
    fn finish(self, key: &str) -> Result<Option<ModelRef>> {
        let Some((brand_id, model)) = self.identity else {
            return Ok(None);
        };
        Ok(Some(ModelRef {
            brand_id,
            model,
            revision: self
                .revision
                .with_context(|| format!("missing {key}_revision"))?,
            grade: self.grade.unwrap_or_default(),
        }))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn parse_modeenv(raw: &str) -> Result<Modeenv> {
    let mut mode = None;
    let mut recovery_system = None;
    let mut current_recovery_systems = Vec::new();
    let mut good_recovery_systems = Vec::new();
    let mut model = PartialModel::default();
    let mut try_model = PartialModel::default();

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let (target, key) = match k.strip_prefix("try_") {
            Some(rest) => (&mut try_model, rest),
            None => (&mut model, k),
        };
        match key {
            "mode" => mode = Some(v.to_string()),
            "recovery_system" => recovery_system = Some(v.to_string()),
            "current_recovery_systems" => current_recovery_systems = split_list(v),
            "good_recovery_systems" => good_recovery_systems = split_list(v),
            "model" => {
                let (brand_id, name) = v
                    .split_once('/')
                    .ok_or_else(|| anyhow!("invalid {k} value '{v}'"))?;
                target.identity = Some((brand_id.to_string(), name.to_string()));
            }
            "grade" => target.grade = Some(v.parse()?),
            "model_revision" => {
                target.revision = Some(v.parse().with_context(|| format!("{k} must be u32"))?)
            }
            _ => {}
        }
    }

    Ok(Modeenv {
        mode: mode.context("missing mode")?,
        recovery_system,
        current_recovery_systems,
        good_recovery_systems,
        model: model.finish("model")?,
        try_model: try_model.finish("try_model")?,
    })
}
