use anyhow::Context;
use remodel_core::{
    Model, RecoverySystemSetup, SnapType, ValidationSet, ValidationSetMode, ValidationSetRef,
    ValidationSets,
};
use remodel_state::pick_recovery_system_label;
use tracing::{debug, info};

use crate::{
    check_self_contained, resolve_snap_actions, ActionKind, DeviceBackend, DeviceContext,
    GoalOptions, RemodelError, RemodelOptions, SnapAction, SnapGoals, TaskGraph, TaskId, TaskSet,
};

pub const SET_MODEL_TASK: &str = "set-model";
pub const CREATE_RECOVERY_SYSTEM_TASK: &str = "create-recovery-system";
pub const FINALIZE_RECOVERY_SYSTEM_TASK: &str = "finalize-recovery-system";
pub const UPDATE_GADGET_ASSETS_TASK: &str = "update-gadget-assets";
pub const UPDATE_GADGET_CMDLINE_TASK: &str = "update-gadget-cmdline";
pub const UPDATE_KERNEL_ASSETS_TASK: &str = "update-kernel-assets";
pub const REQUEST_SERIAL_TASK: &str = "request-serial";
pub const PREPARE_REMODELING_TASK: &str = "prepare-remodeling";

pub const RECOVERY_SYSTEM_SETUP_KEY: &str = "recovery-system-setup";
pub const RECOVERY_SYSTEM_SETUP_TASK_KEY: &str = "recovery-system-setup-task";

/// Task graph for one remodel plus the decisions it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RemodelPlan {
    pub graph: TaskGraph,
    pub actions: Vec<SnapAction>,
    pub recovery_system_label: Option<String>,
    pub set_model: TaskId,
}

impl RemodelPlan {
    /// Snaps the plan operates on.
    pub fn planned_snaps(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .filter(|action| !action.is_noop())
            .map(|action| action.name.as_str())
    }
}

fn goal_options(action: &SnapAction, change_id: &str) -> GoalOptions {
    let install = action.kind == ActionKind::Install;
    GoalOptions {
        required: install,
        no_re_refresh: !install,
        from_change: change_id.to_string(),
    }
}

fn revision_label(action: &SnapAction) -> String {
    action.revision.unwrap_or_default().to_string()
}

/// Asset tasks for a kernel or gadget that is re-linked from the cache and
/// so does not get them from a regular refresh.
fn add_asset_tasks(
    graph: &mut TaskGraph,
    set: &mut TaskSet,
    action: &SnapAction,
    base_link: Option<TaskId>,
) -> anyhow::Result<()> {
    let Some(link) = set.link() else {
        return Ok(());
    };
    match action.snap_type {
        SnapType::Gadget => {
            let assets = graph.new_task(
                UPDATE_GADGET_ASSETS_TASK,
                format!(
                    "Update assets from gadget \"{}\" ({})",
                    action.name,
                    revision_label(action)
                ),
            );
            graph.wait_for(assets, link)?;
            if let Some(base_link) = base_link {
                graph.wait_for(assets, base_link)?;
            }
            let cmdline = graph.new_task(
                UPDATE_GADGET_CMDLINE_TASK,
                format!(
                    "Update kernel command line from gadget \"{}\" ({})",
                    action.name,
                    revision_label(action)
                ),
            );
            graph.wait_for(cmdline, assets)?;
            set.add_task(assets);
            set.add_task(cmdline);
        }
        SnapType::Kernel => {
            let assets = graph.new_task(
                UPDATE_KERNEL_ASSETS_TASK,
                format!(
                    "Update assets from kernel \"{}\" ({})",
                    action.name,
                    revision_label(action)
                ),
            );
            graph.wait_for(assets, link)?;
            set.add_task(assets);
        }
        _ => {}
    }
    Ok(())
}

/// Turns resolved snap actions into the task graph of a remodel change.
///
/// Downloads are chained one after the other. Nothing touches the live
/// system before every download is verified, local modifications run one
/// snap at a time, and when `recovery` is given they also wait for the new
/// recovery system to be created and finalized. The graph always ends with
/// a single set-model task that waits for everything else.
pub fn build_task_graph<G>(
    goals: &mut G,
    ctx: &DeviceContext,
    actions: Vec<SnapAction>,
    change_id: &str,
    recovery: Option<RecoverySystemSetup>,
) -> Result<RemodelPlan, RemodelError>
where
    G: SnapGoals + ?Sized,
{
    let mut graph = TaskGraph::new(change_id);
    let mut sets = Vec::new();
    let mut base_link = None;

    for action in actions.iter().filter(|action| !action.is_noop()) {
        let target = action.target();
        let options = goal_options(action, change_id);
        let planned = match action.kind {
            ActionKind::Install => goals.install(&mut graph, ctx, &target, &options),
            ActionKind::Update => goals.update(&mut graph, ctx, &target, &options),
            ActionKind::SwitchChannel => goals.switch_channel(&mut graph, ctx, &target, &options),
            ActionKind::LinkExisting => goals.link_existing(&mut graph, ctx, &target, &options),
            ActionKind::NoOp => continue,
        };
        let mut set = planned
            .with_context(|| format!("cannot plan {} of snap \"{}\"", action.kind, action.name))?;
        if set.is_empty() {
            continue;
        }

        if action.kind == ActionKind::LinkExisting {
            add_asset_tasks(&mut graph, &mut set, action, base_link)?;
        }
        if matches!(action.snap_type, SnapType::Base | SnapType::Core) {
            base_link = set.link();
        }
        debug!(
            change_id,
            snap = %action.name,
            action = %action.kind,
            tasks = set.tasks().len(),
            "planned snap tasks"
        );
        sets.push(set);
    }

    let mut last_download = None;
    let mut last_install = None;
    let mut install_heads = Vec::new();
    for set in &sets {
        if let (Some(begin), Some(previous)) = (set.begin(), last_download) {
            graph.wait_for(begin, previous)?;
        }
        if let Some(done) = set.download_done() {
            last_download = Some(done);
        }

        let (_, install) = set.phases();
        if let Some(&head) = install.first() {
            if let Some(previous) = last_install {
                graph.wait_for(head, previous)?;
            }
            install_heads.push(head);
        }
        if let Some(&last) = install.last() {
            last_install = Some(last);
        }
    }

    if let Some(done) = last_download {
        for head in &install_heads {
            graph.wait_for(*head, done)?;
        }
    }

    let recovery_system_label = recovery.as_ref().map(|setup| setup.label.clone());
    if let Some(mut setup) = recovery {
        setup.snap_setup_tasks = sets
            .iter()
            .filter_map(TaskSet::snap_setup)
            .map(|task| task.to_string())
            .collect();

        let create = graph.new_task(
            CREATE_RECOVERY_SYSTEM_TASK,
            format!("Create recovery system with label \"{}\"", setup.label),
        );
        let finalize = graph.new_task(
            FINALIZE_RECOVERY_SYSTEM_TASK,
            format!("Finalize recovery system with label \"{}\"", setup.label),
        );
        if let Some(done) = last_download {
            graph.wait_for(create, done)?;
        }
        graph.wait_for(finalize, create)?;
        if let Some(done) = last_download {
            graph.wait_for(finalize, done)?;
        }
        graph.set_data(create, RECOVERY_SYSTEM_SETUP_KEY, &setup)?;
        graph.set_data(finalize, RECOVERY_SYSTEM_SETUP_TASK_KEY, &create)?;

        for head in &install_heads {
            graph.wait_for(*head, create)?;
            graph.wait_for(*head, finalize)?;
        }
        info!(change_id, label = %setup.label, "planned recovery system");
    }

    let earlier: Vec<TaskId> = graph.tasks().iter().map(|task| task.id).collect();
    let set_model = graph.new_task(SET_MODEL_TASK, "Set new model assertion");
    for task in earlier {
        graph.wait_for(set_model, task)?;
    }

    Ok(RemodelPlan {
        graph,
        actions,
        recovery_system_label,
        set_model,
    })
}

fn fetch_enforced_sets<F>(model: &Model, fetch: &mut F) -> Result<ValidationSets, RemodelError>
where
    F: FnMut(&ValidationSetRef) -> anyhow::Result<ValidationSet>,
{
    let sets = model
        .validation_sets
        .iter()
        .filter(|set| set.mode == ValidationSetMode::Enforce)
        .map(|set| {
            fetch(set).with_context(|| format!("cannot fetch validation set {}", set.key()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(ValidationSets::from_sets(&sets)?)
}

/// Resolves, checks and builds the snap part of a remodel.
pub(crate) fn plan_snap_changes<B, G, F>(
    backend: &B,
    goals: &mut G,
    fetch_validation_set: &mut F,
    ctx: &DeviceContext,
    change_id: &str,
    options: &RemodelOptions,
) -> Result<RemodelPlan, RemodelError>
where
    B: DeviceBackend + ?Sized,
    G: SnapGoals + ?Sized,
    F: FnMut(&ValidationSetRef) -> anyhow::Result<ValidationSet>,
{
    let sets = fetch_enforced_sets(ctx.model(), fetch_validation_set)?;
    let installed = backend.installed_snaps()?;
    let mut actions =
        resolve_snap_actions(ctx, &installed, &sets, &options.local, options.offline)?;

    for action in actions.iter_mut().filter(|action| {
        matches!(action.kind, ActionKind::Install | ActionKind::Update) && action.local.is_none()
    }) {
        let info = goals
            .snap_info(ctx, &action.target())
            .with_context(|| format!("cannot get information about snap \"{}\"", action.name))?;
        action.base = info.base;
        action.default_providers = info.default_providers;
    }
    check_self_contained(ctx.model(), &installed, &actions)?;

    let recovery = if ctx.needs_recovery_system() {
        let label = pick_recovery_system_label(
            &options.systems_dir,
            options.today,
            options.label_probe_limit,
        )?;
        Some(RecoverySystemSetup::new(label, &options.systems_dir))
    } else {
        None
    };
    build_task_graph(goals, ctx, actions, change_id, recovery)
}

/// Re-registration changes only get a serial request; the snap graph is
/// computed once the new identity is in place.
pub(crate) fn rereg_task_graph(change_id: &str) -> anyhow::Result<TaskGraph> {
    let mut graph = TaskGraph::new(change_id);
    let request = graph.new_task(REQUEST_SERIAL_TASK, "Request new device serial");
    let prepare = graph.new_task(PREPARE_REMODELING_TASK, "Prepare remodeling");
    graph.wait_for(prepare, request)?;
    Ok(graph)
}
