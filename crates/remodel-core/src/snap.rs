use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Snap revision. Store revisions are positive, unasserted local
/// revisions are negative and rendered as `x<N>`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Revision(i32);

impl Revision {
    pub const UNSET: Revision = Revision(0);

    pub fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn local(value: i32) -> Self {
        Self(-value.abs())
    }

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn is_local(self) -> bool {
        self.0 < 0
    }

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if let Some(local) = trimmed.strip_prefix('x') {
            let value: i32 = local
                .parse()
                .with_context(|| format!("invalid local revision '{input}'"))?;
            if value <= 0 {
                return Err(anyhow!("invalid local revision '{input}'"));
            }
            return Ok(Self::local(value));
        }
        let value: i32 = trimmed
            .parse()
            .with_context(|| format!("invalid revision '{input}'"))?;
        if value < 0 {
            return Err(anyhow!("invalid revision '{input}'"));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "x{}", -self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    #[default]
    App,
    Base,
    Core,
    Gadget,
    Kernel,
    Snapd,
}

impl SnapType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Base => "base",
            Self::Core => "core",
            Self::Gadget => "gadget",
            Self::Kernel => "kernel",
            Self::Snapd => "snapd",
        }
    }

    pub fn is_essential(self) -> bool {
        !matches!(self, Self::App)
    }

    /// Rank in the fixed essential ordering: snapd, kernel, base, gadget.
    pub fn essential_rank(self) -> Option<usize> {
        match self {
            Self::Snapd => Some(0),
            Self::Kernel => Some(1),
            Self::Base | Self::Core => Some(2),
            Self::Gadget => Some(3),
            Self::App => None,
        }
    }
}

impl fmt::Display for SnapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Required,
    Optional,
    Invalid,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
            Self::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SideInfo {
    pub name: String,
    #[serde(default)]
    pub snap_id: Option<String>,
    #[serde(default)]
    pub revision: Revision,
    #[serde(default)]
    pub channel: Option<String>,
}

impl SideInfo {
    /// Snaps without a snap id or with a local revision carry no store assertions.
    pub fn is_unasserted(&self) -> bool {
        self.snap_id.is_none() || self.revision.is_local() || self.revision.is_unset()
    }
}

/// A snap file supplied by the caller for an offline remodel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LocalSnap {
    pub side_info: SideInfo,
    pub path: PathBuf,
    #[serde(rename = "type", default)]
    pub snap_type: SnapType,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub default_providers: Vec<String>,
    #[serde(default)]
    pub sha384: Option<String>,
}

/// A component file supplied by the caller for an offline remodel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LocalComponent {
    pub snap: String,
    pub component: String,
    #[serde(default)]
    pub revision: Revision,
    pub path: PathBuf,
    #[serde(default)]
    pub sha384: Option<String>,
}

impl LocalComponent {
    /// The `snap+component` reference used in messages and lookups.
    pub fn reference(&self) -> String {
        format!("{}+{}", self.snap, self.component)
    }
}

/// Snap as currently installed on the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct InstalledSnap {
    pub name: String,
    #[serde(default)]
    pub snap_id: Option<String>,
    #[serde(rename = "type", default)]
    pub snap_type: SnapType,
    pub current: Revision,
    #[serde(default)]
    pub channel: Option<String>,
    /// Revisions still present on disk, including `current`.
    #[serde(default)]
    pub sequence: Vec<Revision>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub default_providers: Vec<String>,
    #[serde(default)]
    pub components: BTreeMap<String, Revision>,
    #[serde(default)]
    pub required: bool,
}

impl InstalledSnap {
    pub fn has_revision(&self, revision: Revision) -> bool {
        self.current == revision || self.sequence.contains(&revision)
    }

    pub fn tracks(&self, channel: &str) -> bool {
        self.channel.as_deref() == Some(channel)
    }
}
