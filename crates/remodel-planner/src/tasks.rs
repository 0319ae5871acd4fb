use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u32);

impl TaskId {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub summary: String,
    #[serde(default)]
    pub wait_tasks: Vec<TaskId>,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub log: Vec<String>,
    /// Correlation id of the change this task was produced for.
    pub change_id: String,
}

impl Task {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .with_context(|| format!("task {} has malformed '{key}' data", self.id))
            })
            .transpose()
    }

    pub fn waits_on(&self, other: TaskId) -> bool {
        self.wait_tasks.contains(&other)
    }
}

/// Arena of tasks produced for one change. Ids are assigned in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskGraph {
    change_id: String,
    tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn new(change_id: impl Into<String>) -> Self {
        Self {
            change_id: change_id.into(),
            tasks: Vec::new(),
        }
    }

    pub fn change_id(&self) -> &str {
        &self.change_id
    }

    pub fn new_task(&mut self, kind: &str, summary: impl Into<String>) -> TaskId {
        let id = TaskId(self.tasks.len() as u32 + 1);
        self.tasks.push(Task {
            id,
            kind: kind.to_string(),
            summary: summary.into(),
            wait_tasks: Vec::new(),
            data: BTreeMap::new(),
            log: Vec::new(),
            change_id: self.change_id.clone(),
        });
        id
    }

    fn index(&self, id: TaskId) -> Result<usize> {
        let index = (id.0 as usize)
            .checked_sub(1)
            .filter(|index| *index < self.tasks.len())
            .ok_or_else(|| anyhow!("unknown task {id} in change {}", self.change_id))?;
        Ok(index)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.index(id).ok().map(|index| &self.tasks[index])
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |task| task.kind == kind)
    }

    /// Makes `task` wait for `on`. Waits keep insertion order and are not
    /// duplicated.
    pub fn wait_for(&mut self, task: TaskId, on: TaskId) -> Result<()> {
        self.index(on)?;
        let index = self.index(task)?;
        if task == on {
            return Err(anyhow!("task {task} cannot wait for itself"));
        }
        let waits = &mut self.tasks[index].wait_tasks;
        if !waits.contains(&on) {
            waits.push(on);
        }
        Ok(())
    }

    pub fn wait_all(&mut self, task: TaskId, on: &TaskSet) -> Result<()> {
        for other in on.tasks() {
            self.wait_for(task, *other)?;
        }
        Ok(())
    }

    pub fn set_data<T: Serialize>(&mut self, task: TaskId, key: &str, value: &T) -> Result<()> {
        let index = self.index(task)?;
        let encoded = serde_json::to_value(value)
            .with_context(|| format!("failed encoding '{key}' for task {task}"))?;
        self.tasks[index].data.insert(key.to_string(), encoded);
        Ok(())
    }

    pub fn log(&mut self, task: TaskId, message: impl Into<String>) -> Result<()> {
        let index = self.index(task)?;
        self.tasks[index].log.push(message.into());
        Ok(())
    }
}

/// Named markers that let subgraphs produced by different collaborators be
/// stitched together without knowing their internal shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskEdge {
    Begin,
    DownloadAndChecksDone,
    LastBeforeLocalModifications,
    SnapSetup,
    Link,
}

/// An ordered group of tasks from one graph plus its edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSet {
    tasks: Vec<TaskId>,
    edges: BTreeMap<TaskEdge, TaskId>,
}

impl TaskSet {
    pub fn new(tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
            edges: BTreeMap::new(),
        }
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn add_task(&mut self, task: TaskId) {
        if !self.tasks.contains(&task) {
            self.tasks.push(task);
        }
    }

    pub fn add_all(&mut self, other: &TaskSet) {
        for task in other.tasks() {
            self.add_task(*task);
        }
    }

    pub fn mark_edge(&mut self, task: TaskId, edge: TaskEdge) {
        self.edges.insert(edge, task);
    }

    pub fn edge(&self, edge: TaskEdge) -> Option<TaskId> {
        self.edges.get(&edge).copied()
    }

    pub fn first(&self) -> Option<TaskId> {
        self.tasks.first().copied()
    }

    pub fn last(&self) -> Option<TaskId> {
        self.tasks.last().copied()
    }

    pub fn begin(&self) -> Option<TaskId> {
        self.edge(TaskEdge::Begin).or_else(|| self.first())
    }

    /// Last task that only downloads or verifies, if the set has any.
    pub fn download_done(&self) -> Option<TaskId> {
        self.edge(TaskEdge::LastBeforeLocalModifications)
            .or_else(|| self.edge(TaskEdge::DownloadAndChecksDone))
    }

    pub fn link(&self) -> Option<TaskId> {
        self.edge(TaskEdge::Link).or_else(|| self.last())
    }

    pub fn snap_setup(&self) -> Option<TaskId> {
        self.edge(TaskEdge::SnapSetup)
            .or_else(|| self.edge(TaskEdge::DownloadAndChecksDone))
            .or_else(|| self.first())
    }

    /// Splits the set into the tasks up to and including `download_done`
    /// and the tasks that modify the live system.
    pub fn phases(&self) -> (&[TaskId], &[TaskId]) {
        let split = self
            .download_done()
            .and_then(|edge| self.tasks.iter().position(|task| *task == edge))
            .map_or(0, |position| position + 1);
        self.tasks.split_at(split)
    }
}
