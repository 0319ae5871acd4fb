use anyhow::Result;
use remodel_core::Revision;
use remodel_planner::{
    ComponentActionKind, DeviceContext, GoalOptions, GoalTarget, SnapGoals, SnapInfo, TaskEdge,
    TaskGraph, TaskId, TaskSet,
};

/// Goal resolver producing the usual download, verify and install task
/// shapes. Nothing is fetched; snap facts come from local files only.
#[derive(Debug, Default)]
pub struct DemoGoals;

fn revision_suffix(revision: Option<Revision>) -> String {
    revision
        .map(|revision| format!(" ({revision})"))
        .unwrap_or_default()
}

fn chain(graph: &mut TaskGraph, tasks: &[TaskId]) -> Result<()> {
    for pair in tasks.windows(2) {
        graph.wait_for(pair[1], pair[0])?;
    }
    Ok(())
}

impl DemoGoals {
    fn fetch_tasks(
        &self,
        graph: &mut TaskGraph,
        target: &GoalTarget,
        verb: &str,
    ) -> Result<(Vec<TaskId>, TaskId, TaskId)> {
        let name = &target.name;
        let revision = revision_suffix(target.revision);
        if let Some(local) = &target.local {
            let prepare = graph.new_task(
                "prepare-snap",
                format!("Prepare snap \"{}\"{revision}", local.path.display()),
            );
            return Ok((vec![prepare], prepare, prepare));
        }

        let channel = target
            .channel
            .as_deref()
            .map(|channel| format!(" from channel \"{channel}\""))
            .unwrap_or_default();
        let download = graph.new_task(
            "download-snap",
            format!("{verb} snap \"{name}\"{revision}{channel}"),
        );
        let validate = graph.new_task(
            "validate-snap",
            format!("Fetch and check assertions for snap \"{name}\"{revision}"),
        );
        Ok((vec![download, validate], download, validate))
    }

    fn component_tasks(&self, graph: &mut TaskGraph, target: &GoalTarget) -> Vec<TaskId> {
        target
            .components
            .iter()
            .map(|component| {
                let reference = format!("{}+{}", target.name, component.name);
                match component.kind {
                    ComponentActionKind::Install | ComponentActionKind::Update => graph.new_task(
                        "mount-component",
                        format!(
                            "Mount component \"{reference}\"{}",
                            revision_suffix(component.revision)
                        ),
                    ),
                    ComponentActionKind::Remove => graph.new_task(
                        "unlink-component",
                        format!("Remove component \"{reference}\""),
                    ),
                }
            })
            .collect()
    }

    fn install_shape(
        &self,
        graph: &mut TaskGraph,
        target: &GoalTarget,
        verb: &str,
    ) -> Result<TaskSet> {
        let (mut tasks, begin, checked) = self.fetch_tasks(graph, target, verb)?;
        let mount = graph.new_task(
            "mount-snap",
            format!(
                "Mount snap \"{}\"{}",
                target.name,
                revision_suffix(target.revision)
            ),
        );
        tasks.push(mount);
        tasks.extend(self.component_tasks(graph, target));
        let link = graph.new_task(
            "link-snap",
            format!("Make snap \"{}\" available to the system", target.name),
        );
        tasks.push(link);
        chain(graph, &tasks)?;

        let mut set = TaskSet::new(tasks);
        set.mark_edge(begin, TaskEdge::Begin);
        set.mark_edge(begin, TaskEdge::SnapSetup);
        set.mark_edge(checked, TaskEdge::DownloadAndChecksDone);
        set.mark_edge(link, TaskEdge::Link);
        Ok(set)
    }
}

impl SnapGoals for DemoGoals {
    fn snap_info(&mut self, _ctx: &DeviceContext, target: &GoalTarget) -> Result<SnapInfo> {
        Ok(target
            .local
            .as_ref()
            .map(|local| SnapInfo {
                base: local.base.clone(),
                default_providers: local.default_providers.clone(),
            })
            .unwrap_or_default())
    }

    fn install(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        _options: &GoalOptions,
    ) -> Result<TaskSet> {
        self.install_shape(graph, target, "Download")
    }

    fn update(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        _options: &GoalOptions,
    ) -> Result<TaskSet> {
        self.install_shape(graph, target, "Refresh")
    }

    fn switch_channel(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        _options: &GoalOptions,
    ) -> Result<TaskSet> {
        let channel = target.channel.as_deref().unwrap_or("stable");
        let task = graph.new_task(
            "switch-snap-channel",
            format!(
                "Switch snap \"{}\" to channel \"{channel}\"",
                target.name
            ),
        );
        let mut set = TaskSet::new([task]);
        set.mark_edge(task, TaskEdge::Link);
        Ok(set)
    }

    fn link_existing(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        _options: &GoalOptions,
    ) -> Result<TaskSet> {
        let prepare = graph.new_task(
            "prepare-snap",
            format!(
                "Prepare cached snap \"{}\"{}",
                target.name,
                revision_suffix(target.revision)
            ),
        );
        let mut tasks = vec![prepare];
        tasks.extend(self.component_tasks(graph, target));
        let link = graph.new_task(
            "link-snap",
            format!("Make snap \"{}\" available to the system", target.name),
        );
        tasks.push(link);
        chain(graph, &tasks)?;

        let mut set = TaskSet::new(tasks);
        set.mark_edge(prepare, TaskEdge::SnapSetup);
        set.mark_edge(link, TaskEdge::Link);
        Ok(set)
    }
}
