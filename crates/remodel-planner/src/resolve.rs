use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use remodel_core::{
    InstalledSnap, LocalComponent, LocalSnap, ModelSnap, Presence, Revision, SnapType,
    ValidationSets,
};
use serde::{Deserialize, Serialize};

use crate::{DeviceContext, GoalTarget, LocalFiles, RemodelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    NoOp,
    Install,
    Update,
    SwitchChannel,
    /// Re-link a revision that is already cached on the device.
    LinkExisting,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoOp => "no-op",
            Self::Install => "install",
            Self::Update => "update",
            Self::SwitchChannel => "switch-channel",
            Self::LinkExisting => "link-existing",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentActionKind {
    Install,
    Update,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ComponentAction {
    pub name: String,
    pub kind: ComponentActionKind,
    #[serde(default)]
    pub revision: Option<Revision>,
    #[serde(default)]
    pub local: Option<LocalComponent>,
}

/// What has to happen to one snap for the device to match the new model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapAction {
    pub name: String,
    pub kind: ActionKind,
    pub snap_type: SnapType,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub revision: Option<Revision>,
    #[serde(default)]
    pub local: Option<LocalSnap>,
    #[serde(default)]
    pub components: Vec<ComponentAction>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub default_providers: Vec<String>,
    pub required: bool,
}

impl SnapAction {
    fn for_installed(installed: &InstalledSnap, snap: &ModelSnap, required: bool) -> Self {
        Self {
            name: installed.name.clone(),
            kind: ActionKind::NoOp,
            snap_type: snap.snap_type,
            channel: snap.default_channel.clone(),
            revision: Some(installed.current),
            local: None,
            components: Vec::new(),
            base: installed.base.clone(),
            default_providers: installed.default_providers.clone(),
            required,
        }
    }

    fn for_missing(snap: &ModelSnap, required: bool) -> Self {
        Self {
            name: snap.name.clone(),
            kind: ActionKind::Install,
            snap_type: snap.snap_type,
            channel: snap.default_channel.clone(),
            revision: None,
            local: None,
            components: Vec::new(),
            base: None,
            default_providers: Vec::new(),
            required,
        }
    }

    fn use_local(&mut self, kind: ActionKind, local: &LocalSnap) {
        self.kind = kind;
        self.revision = Some(local.side_info.revision);
        self.base = local.base.clone();
        self.default_providers = local.default_providers.clone();
        self.local = Some(local.clone());
    }

    pub fn is_noop(&self) -> bool {
        self.kind == ActionKind::NoOp
    }

    /// Whether the snap ends up at a revision that has not been verified in
    /// place yet.
    pub fn changes_revision(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Install | ActionKind::Update | ActionKind::LinkExisting
        )
    }

    pub fn target(&self) -> GoalTarget {
        GoalTarget {
            name: self.name.clone(),
            snap_type: self.snap_type,
            channel: self.channel.clone(),
            revision: self.revision,
            local: self.local.clone(),
            components: self.components.clone(),
        }
    }
}

fn channel_satisfied(installed: &InstalledSnap, wanted: Option<&str>) -> bool {
    let Some(wanted) = wanted else {
        return true;
    };
    if wanted.contains('/') {
        return installed.tracks(wanted);
    }
    installed
        .channel
        .as_deref()
        .and_then(|tracking| tracking.split('/').next())
        == Some(wanted)
}

fn check_local_pin(
    name: &str,
    local_revision: Revision,
    unasserted: bool,
    pin: Revision,
) -> Result<(), RemodelError> {
    if unasserted {
        return Err(RemodelError::UnassertedRevision {
            name: name.to_string(),
            required: pin,
        });
    }
    if local_revision != pin {
        return Err(RemodelError::LocalRevisionMismatch {
            name: name.to_string(),
            provided: local_revision,
            required: pin,
        });
    }
    Ok(())
}

struct DeltaResolver<'a> {
    ctx: &'a DeviceContext,
    installed: BTreeMap<&'a str, &'a InstalledSnap>,
    sets: &'a ValidationSets,
    local: &'a LocalFiles,
    offline: bool,
}

/// Decides the action for every snap of the new model.
///
/// Actions come back in installation order: the essential snaps (snapd,
/// kernel, base, gadget), the remaining snaps that are already installed in
/// declaration order, then the snaps new to the device. Snaps with nothing
/// to do are returned as `NoOp` so callers can see the whole picture.
pub fn resolve_snap_actions(
    ctx: &DeviceContext,
    installed: &[InstalledSnap],
    sets: &ValidationSets,
    local: &LocalFiles,
    offline: bool,
) -> Result<Vec<SnapAction>, RemodelError> {
    let resolver = DeltaResolver {
        ctx,
        installed: installed
            .iter()
            .map(|snap| (snap.name.as_str(), snap))
            .collect(),
        sets,
        local,
        offline,
    };
    resolver.resolve()
}

impl DeltaResolver<'_> {
    fn resolve(&self) -> Result<Vec<SnapAction>, RemodelError> {
        let new = self.ctx.model();
        let essential = new.essential_snaps();
        let essential_names: BTreeSet<&str> =
            essential.iter().map(|snap| snap.name.as_str()).collect();
        let (present, missing): (Vec<&ModelSnap>, Vec<&ModelSnap>) = new
            .snaps
            .iter()
            .filter(|snap| !essential_names.contains(snap.name.as_str()))
            .partition(|snap| self.installed.contains_key(snap.name.as_str()));

        let mut actions = Vec::new();
        for snap in essential.into_iter().chain(present).chain(missing) {
            if let Some(action) = self.resolve_model_snap(snap)? {
                actions.push(action);
            }
        }

        self.check_dropped_snaps()?;
        Ok(actions)
    }

    fn resolve_model_snap(&self, snap: &ModelSnap) -> Result<Option<SnapAction>, RemodelError> {
        let constraints = self.sets.constraints(&snap.name);
        if constraints.is_invalid() {
            if snap.presence == Presence::Required {
                return Err(RemodelError::InvalidSnapRequired {
                    name: snap.name.clone(),
                });
            }
            return Ok(None);
        }

        let required = snap.presence == Presence::Required || constraints.is_required();
        let installed = self.installed.get(snap.name.as_str()).copied();
        let mut action = match installed {
            Some(installed) => {
                self.resolve_installed(snap, installed, constraints.revision, required)?
            }
            None if !required => return Ok(None),
            None => self.resolve_missing(snap, constraints.revision, required)?,
        };

        action.components = self.resolve_components(snap, installed, action.kind)?;
        if action.kind == ActionKind::NoOp && !action.components.is_empty() {
            action.kind = ActionKind::LinkExisting;
        }
        Ok(Some(action))
    }

    fn resolve_installed(
        &self,
        snap: &ModelSnap,
        installed: &InstalledSnap,
        pin: Option<Revision>,
        required: bool,
    ) -> Result<SnapAction, RemodelError> {
        let mut action = SnapAction::for_installed(installed, snap, required);
        let channel_ok = channel_satisfied(installed, snap.default_channel.as_deref());
        let local = self.local.snap(&snap.name);

        match pin {
            Some(pin) if pin != installed.current => {
                if installed.has_revision(pin) {
                    action.kind = ActionKind::LinkExisting;
                    action.revision = Some(pin);
                } else if self.offline {
                    let local = local.ok_or_else(|| RemodelError::WrongRevision {
                        name: snap.name.clone(),
                        installed: installed.current,
                        required: pin,
                    })?;
                    check_local_pin(
                        &snap.name,
                        local.side_info.revision,
                        local.side_info.is_unasserted(),
                        pin,
                    )?;
                    action.use_local(ActionKind::Update, local);
                } else {
                    action.kind = ActionKind::Update;
                    action.revision = Some(pin);
                }
            }
            Some(_) => {
                if !channel_ok {
                    action.kind = ActionKind::SwitchChannel;
                }
            }
            None if self.offline => {
                match local.filter(|local| local.side_info.revision != installed.current) {
                    Some(local) => action.use_local(ActionKind::Update, local),
                    None if !channel_ok => action.kind = ActionKind::SwitchChannel,
                    None => {}
                }
            }
            None => {
                if !channel_ok {
                    action.kind = ActionKind::Update;
                    action.revision = None;
                }
            }
        }
        Ok(action)
    }

    fn resolve_missing(
        &self,
        snap: &ModelSnap,
        pin: Option<Revision>,
        required: bool,
    ) -> Result<SnapAction, RemodelError> {
        let mut action = SnapAction::for_missing(snap, required);
        if !self.offline {
            action.revision = pin;
            return Ok(action);
        }

        let local = self
            .local
            .snap(&snap.name)
            .ok_or_else(|| RemodelError::NoSnapFile {
                name: snap.name.clone(),
            })?;
        if let Some(pin) = pin {
            check_local_pin(
                &snap.name,
                local.side_info.revision,
                local.side_info.is_unasserted(),
                pin,
            )?;
        }
        action.use_local(ActionKind::Install, local);
        Ok(action)
    }

    fn resolve_components(
        &self,
        snap: &ModelSnap,
        installed: Option<&InstalledSnap>,
        parent: ActionKind,
    ) -> Result<Vec<ComponentAction>, RemodelError> {
        let mut wanted: BTreeMap<&str, (Presence, Option<Revision>)> = snap
            .components
            .iter()
            .map(|(name, presence)| (name.as_str(), (*presence, None)))
            .collect();
        for (name, constraints) in self.sets.components_of(&snap.name) {
            let entry = wanted.entry(name).or_insert((Presence::Optional, None));
            if let Some(presence) = constraints.presence {
                entry.0 = presence;
            }
            if constraints.revision.is_some() {
                entry.1 = constraints.revision;
            }
        }

        let parent_refreshes = matches!(parent, ActionKind::Install | ActionKind::Update);
        let mut actions = Vec::new();
        for (name, (presence, pin)) in wanted {
            let current = installed.and_then(|snap| snap.components.get(name)).copied();
            let local = self.local.component(&snap.name, name);
            let kind = match (presence, current) {
                (Presence::Invalid, Some(_)) => Some(ComponentActionKind::Remove),
                (Presence::Invalid, None) => None,
                (_, Some(revision)) => {
                    let repinned = pin.is_some_and(|pin| pin != revision);
                    let replaced = self.offline
                        && local.is_some_and(|local| local.revision != revision);
                    (repinned || replaced || parent_refreshes)
                        .then_some(ComponentActionKind::Update)
                }
                (Presence::Optional, None) => {
                    (self.offline && local.is_some()).then_some(ComponentActionKind::Install)
                }
                (Presence::Required, None) => Some(ComponentActionKind::Install),
            };
            let Some(kind) = kind else {
                continue;
            };

            let mut action = ComponentAction {
                name: name.to_string(),
                kind,
                revision: pin,
                local: None,
            };
            if kind != ComponentActionKind::Remove && self.offline {
                let local = local.ok_or_else(|| RemodelError::NoComponentFile {
                    reference: format!("{}+{}", snap.name, name),
                })?;
                if let Some(pin) = pin {
                    check_local_pin(
                        &local.reference(),
                        local.revision,
                        local.revision.is_local(),
                        pin,
                    )?;
                }
                action.revision = Some(local.revision);
                action.local = Some(local.clone());
            }
            actions.push(action);
        }
        Ok(actions)
    }

    /// Snaps only the old model declared stay on the device untouched, but a
    /// validation set that still requires them must be satisfied as is.
    fn check_dropped_snaps(&self) -> Result<(), RemodelError> {
        let new = self.ctx.model();
        for snap in &self.ctx.old_model().snaps {
            if new.snap(&snap.name).is_some() {
                continue;
            }
            let constraints = self.sets.constraints(&snap.name);
            if !constraints.is_required() {
                continue;
            }
            let retained = self
                .installed
                .get(snap.name.as_str())
                .is_some_and(|installed| {
                    constraints
                        .revision
                        .map_or(true, |pin| pin == installed.current)
                });
            if !retained {
                return Err(RemodelError::RequiredSnapMissing {
                    name: snap.name.clone(),
                });
            }
        }
        Ok(())
    }
}
