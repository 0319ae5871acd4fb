use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::snap::{Presence, Revision};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationSetComponent {
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub revision: Option<Revision>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationSetSnap {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub revision: Option<Revision>,
    #[serde(default)]
    pub components: BTreeMap<String, ValidationSetComponent>,
}

/// A fetched validation set at a concrete sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationSet {
    pub account_id: String,
    pub name: String,
    pub sequence: u32,
    #[serde(default)]
    pub snaps: Vec<ValidationSetSnap>,
}

impl ValidationSet {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("failed to parse validation set")
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.account_id, self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapConstraints {
    pub presence: Option<Presence>,
    pub revision: Option<Revision>,
}

impl SnapConstraints {
    pub fn is_required(&self) -> bool {
        self.presence == Some(Presence::Required)
    }

    pub fn is_invalid(&self) -> bool {
        self.presence == Some(Presence::Invalid)
    }
}

pub type ComponentConstraints = SnapConstraints;

/// Combined view over every enforced validation set.
#[derive(Debug, Clone, Default)]
pub struct ValidationSets {
    snaps: BTreeMap<String, SnapConstraints>,
    components: BTreeMap<(String, String), ComponentConstraints>,
}

fn merge(
    current: &mut SnapConstraints,
    incoming: SnapConstraints,
    what: &str,
    set_key: &str,
) -> anyhow::Result<()> {
    match (current.revision, incoming.revision) {
        (Some(existing), Some(pinned)) if existing != pinned => {
            return Err(anyhow!(
                "validation sets pin {what} to conflicting revisions {existing} and {pinned} (from {set_key})"
            ));
        }
        (None, Some(pinned)) => current.revision = Some(pinned),
        _ => {}
    }

    match (current.presence, incoming.presence) {
        (Some(Presence::Invalid), Some(Presence::Required))
        | (Some(Presence::Required), Some(Presence::Invalid)) => {
            return Err(anyhow!(
                "validation sets disagree on presence of {what} (from {set_key})"
            ));
        }
        (None, presence) | (Some(Presence::Optional), presence @ Some(_)) => {
            current.presence = presence;
        }
        _ => {}
    }
    Ok(())
}

impl ValidationSets {
    pub fn from_sets<'a>(sets: impl IntoIterator<Item = &'a ValidationSet>) -> anyhow::Result<Self> {
        let mut combined = Self::default();
        for set in sets {
            let set_key = set.key();
            for snap in &set.snaps {
                let entry = combined.snaps.entry(snap.name.clone()).or_default();
                merge(
                    entry,
                    SnapConstraints {
                        presence: Some(snap.presence),
                        revision: snap.revision,
                    },
                    &format!("snap \"{}\"", snap.name),
                    &set_key,
                )?;

                for (component, constraint) in &snap.components {
                    let entry = combined
                        .components
                        .entry((snap.name.clone(), component.clone()))
                        .or_default();
                    merge(
                        entry,
                        SnapConstraints {
                            presence: Some(constraint.presence),
                            revision: constraint.revision,
                        },
                        &format!("component \"{}+{}\"", snap.name, component),
                        &set_key,
                    )?;
                }
            }
        }
        Ok(combined)
    }

    pub fn is_empty(&self) -> bool {
        self.snaps.is_empty() && self.components.is_empty()
    }

    pub fn constraints(&self, snap: &str) -> SnapConstraints {
        self.snaps.get(snap).copied().unwrap_or_default()
    }

    pub fn component_constraints(&self, snap: &str, component: &str) -> ComponentConstraints {
        self.components
            .get(&(snap.to_string(), component.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Components of `snap` that any set mentions.
    pub fn components_of<'a>(&'a self, snap: &'a str) -> impl Iterator<Item = (&'a str, ComponentConstraints)> + 'a {
        self.components
            .iter()
            .filter(move |((owner, _), _)| owner == snap)
            .map(|((_, component), constraints)| (component.as_str(), *constraints))
    }

    pub fn required_snaps(&self) -> impl Iterator<Item = &str> {
        self.snaps
            .iter()
            .filter(|(_, constraints)| constraints.is_required())
            .map(|(name, _)| name.as_str())
    }
}
