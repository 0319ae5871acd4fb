use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snap::{Presence, SnapType};

/// Security tier of a model. Ordering follows the allowed upgrade direction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelGrade {
    #[default]
    Unset,
    Dangerous,
    Signed,
    Secured,
}

impl ModelGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Dangerous => "dangerous",
            Self::Signed => "signed",
            Self::Secured => "secured",
        }
    }
}

impl FromStr for ModelGrade {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "unset" => Ok(Self::Unset),
            "dangerous" => Ok(Self::Dangerous),
            "signed" => Ok(Self::Signed),
            "secured" => Ok(Self::Secured),
            other => Err(anyhow!("unknown model grade '{other}'")),
        }
    }
}

impl fmt::Display for ModelGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationSetMode {
    #[default]
    PreferEnforce,
    Enforce,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationSetRef {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub sequence: Option<u32>,
    #[serde(default)]
    pub mode: ValidationSetMode,
}

impl ValidationSetRef {
    pub fn key(&self) -> String {
        format!("{}/{}", self.account_id, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ModelSnap {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub snap_type: SnapType,
    #[serde(default)]
    pub default_channel: Option<String>,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, Presence>,
}

impl ModelSnap {
    fn named(name: &str, snap_type: SnapType, channel: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            snap_type,
            default_channel: channel,
            presence: Presence::Required,
            components: BTreeMap::new(),
        }
    }
}

/// Identity of a model at a given revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub struct ModelRef {
    pub brand_id: String,
    pub model: String,
    pub revision: u32,
    #[serde(default)]
    pub grade: ModelGrade,
}

impl ModelRef {
    pub fn same_identity(&self, other: &ModelRef) -> bool {
        self.brand_id == other.brand_id && self.model == other.model
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.brand_id, self.model, self.revision)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Model {
    #[serde(alias = "brand")]
    pub brand_id: String,
    pub model: String,
    #[serde(default)]
    pub revision: u32,
    pub architecture: String,
    #[serde(default)]
    pub grade: ModelGrade,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub classic: bool,
    #[serde(default)]
    pub distribution: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub snaps: Vec<ModelSnap>,
    #[serde(default)]
    pub validation_sets: Vec<ValidationSetRef>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Accepted input shape. Pre-UC20 models name the kernel and gadget as
/// `name[=track]` headers and list extra snaps in `required-snaps`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawModel {
    #[serde(alias = "brand")]
    brand_id: String,
    model: String,
    #[serde(default)]
    revision: u32,
    architecture: String,
    #[serde(default)]
    grade: ModelGrade,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    classic: bool,
    #[serde(default)]
    distribution: Option<String>,
    #[serde(default)]
    store: Option<String>,
    #[serde(default)]
    kernel: Option<String>,
    #[serde(default)]
    gadget: Option<String>,
    #[serde(default)]
    required_snaps: Vec<String>,
    #[serde(default)]
    snaps: Vec<ModelSnap>,
    #[serde(default)]
    validation_sets: Vec<ValidationSetRef>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

fn split_track(header: &str) -> (&str, Option<String>) {
    match header.split_once('=') {
        Some((name, track)) if !track.is_empty() => (name, Some(track.to_string())),
        Some((name, _)) => (name, None),
        None => (header, None),
    }
}

impl Model {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let raw: RawModel = toml::from_str(input).context("failed to parse model")?;
        let model = Self::normalize(raw)?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).with_context(|| format!("failed to serialize model {}", self.identity()))
    }

    fn normalize(raw: RawModel) -> anyhow::Result<Self> {
        let mut snaps = Vec::new();
        if let Some(kernel) = raw.kernel.as_deref() {
            let (name, track) = split_track(kernel);
            snaps.push(ModelSnap::named(name, SnapType::Kernel, track));
        }
        if let Some(gadget) = raw.gadget.as_deref() {
            let (name, track) = split_track(gadget);
            snaps.push(ModelSnap::named(name, SnapType::Gadget, track));
        }

        let declares_base = raw
            .snaps
            .iter()
            .any(|snap| matches!(snap.snap_type, SnapType::Base | SnapType::Core));
        if !declares_base {
            // Classic models without a base boot the classic rootfs only.
            match raw.base.as_deref() {
                Some(base) => snaps.push(ModelSnap::named(base, SnapType::Base, None)),
                None if !raw.classic => snaps.push(ModelSnap::named("core", SnapType::Core, None)),
                None => {}
            }
        }

        snaps.extend(raw.snaps);
        for name in &raw.required_snaps {
            snaps.push(ModelSnap::named(name, SnapType::App, None));
        }

        Ok(Self {
            brand_id: raw.brand_id,
            model: raw.model,
            revision: raw.revision,
            architecture: raw.architecture,
            grade: raw.grade,
            base: raw.base,
            classic: raw.classic,
            distribution: raw.distribution,
            store: raw.store,
            snaps,
            validation_sets: raw.validation_sets,
            timestamp: raw.timestamp,
        })
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.brand_id.trim().is_empty() {
            return Err(anyhow!("model brand id must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model name must not be empty"));
        }
        if self.architecture.trim().is_empty() {
            return Err(anyhow!("model '{}' has no architecture", self.model));
        }

        let mut seen = HashSet::new();
        for snap in &self.snaps {
            if snap.name.trim().is_empty() {
                return Err(anyhow!("model '{}' declares a snap with no name", self.model));
            }
            if !seen.insert(snap.name.as_str()) {
                return Err(anyhow!(
                    "model '{}' declares snap '{}' more than once",
                    self.model,
                    snap.name
                ));
            }
        }

        if !self.classic {
            if self.kernel().is_none() {
                return Err(anyhow!("model '{}' has no kernel snap", self.model));
            }
            if self.gadget().is_none() {
                return Err(anyhow!("model '{}' has no gadget snap", self.model));
            }
        }
        Ok(())
    }

    pub fn identity(&self) -> ModelRef {
        ModelRef {
            brand_id: self.brand_id.clone(),
            model: self.model.clone(),
            revision: self.revision,
            grade: self.grade,
        }
    }

    fn snap_of_type(&self, wanted: &[SnapType]) -> Option<&ModelSnap> {
        self.snaps
            .iter()
            .find(|snap| wanted.contains(&snap.snap_type))
    }

    pub fn kernel(&self) -> Option<&ModelSnap> {
        self.snap_of_type(&[SnapType::Kernel])
    }

    pub fn gadget(&self) -> Option<&ModelSnap> {
        self.snap_of_type(&[SnapType::Gadget])
    }

    pub fn base_snap(&self) -> Option<&ModelSnap> {
        self.snap_of_type(&[SnapType::Base, SnapType::Core])
    }

    pub fn snapd(&self) -> Option<&ModelSnap> {
        self.snap_of_type(&[SnapType::Snapd])
    }

    pub fn snap(&self, name: &str) -> Option<&ModelSnap> {
        self.snaps.iter().find(|snap| snap.name == name)
    }

    /// Essential snaps in installation order: snapd, kernel, base, gadget.
    pub fn essential_snaps(&self) -> Vec<&ModelSnap> {
        [self.snapd(), self.kernel(), self.base_snap(), self.gadget()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Non-essential snaps in declaration order.
    pub fn non_essential_snaps(&self) -> Vec<&ModelSnap> {
        self.snaps
            .iter()
            .filter(|snap| !snap.snap_type.is_essential())
            .collect()
    }

    /// Ubuntu Core 20 and later models always carry a grade.
    pub fn is_uc20(&self) -> bool {
        self.grade != ModelGrade::Unset
    }

    /// Whether the base is a dedicated base snap rather than the legacy `core`.
    pub fn has_base(&self) -> bool {
        self.base.is_some()
    }

    /// Classic models with kernel and gadget snaps booting a classic rootfs.
    pub fn is_hybrid_classic(&self) -> bool {
        self.classic && self.kernel().is_some() && self.gadget().is_some()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.identity().fmt(f)
    }
}
