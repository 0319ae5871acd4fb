use super::*;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::anyhow;
use remodel_core::{
    InstalledSnap, LocalComponent, LocalSnap, RecoverySystemSetup, Revision, SideInfo, SnapType,
};
use tempfile::TempDir;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date")
}

fn parse_model(input: &str) -> Model {
    Model::from_toml_str(input).expect("model must parse")
}

fn legacy_model_with(revision: u32, kernel: &str, gadget: &str, extra: &str) -> Model {
    parse_model(&format!(
        r#"
brand-id = "canonical"
model = "pc-model"
revision = {revision}
architecture = "amd64"
kernel = "{kernel}"
gadget = "{gadget}"
{extra}
"#
    ))
}

fn legacy_model(revision: u32, extra: &str) -> Model {
    legacy_model_with(revision, "pc-kernel", "pc", extra)
}

fn uc20_model(revision: u32, grade: &str, extra: &str) -> Model {
    parse_model(&format!(
        r#"
brand-id = "canonical"
model = "pc-model-20"
revision = {revision}
architecture = "amd64"
grade = "{grade}"
base = "core20"

[[snaps]]
name = "pc-kernel"
type = "kernel"
default-channel = "20"

[[snaps]]
name = "pc"
type = "gadget"
default-channel = "20"

[[snaps]]
name = "snapd"
type = "snapd"
{extra}
"#
    ))
}

fn installed(name: &str, snap_type: SnapType, revision: i32, channel: &str) -> InstalledSnap {
    InstalledSnap {
        name: name.to_string(),
        snap_id: Some(format!("{name}-id")),
        snap_type,
        current: Revision::new(revision),
        channel: Some(channel.to_string()),
        sequence: vec![Revision::new(revision)],
        base: None,
        default_providers: Vec::new(),
        components: BTreeMap::new(),
        required: true,
    }
}

fn legacy_installed() -> Vec<InstalledSnap> {
    vec![
        installed("pc-kernel", SnapType::Kernel, 10, "stable"),
        installed("pc", SnapType::Gadget, 5, "stable"),
        installed("core", SnapType::Core, 4, "stable"),
    ]
}

fn uc20_installed() -> Vec<InstalledSnap> {
    vec![
        installed("pc-kernel", SnapType::Kernel, 10, "20/stable"),
        installed("pc", SnapType::Gadget, 5, "20/stable"),
        installed("core20", SnapType::Base, 4, "latest/stable"),
        installed("snapd", SnapType::Snapd, 3, "latest/stable"),
    ]
}

fn change_info(id: &str, kind: &str, snaps: &[&str]) -> ChangeInfo {
    ChangeInfo {
        id: id.to_string(),
        kind: kind.to_string(),
        ready: false,
        snaps: snaps.iter().map(|snap| snap.to_string()).collect(),
    }
}

struct FakeBackend {
    snapshot: DeviceSnapshot,
    later_snapshot: Option<DeviceSnapshot>,
    snapshot_calls: Cell<usize>,
    current: Model,
    installed: Vec<InstalledSnap>,
    changes: Vec<ChangeInfo>,
    later_changes: Option<Vec<ChangeInfo>>,
    changes_calls: Cell<usize>,
    seed: SystemSeed,
    highest_seen: Option<u32>,
}

impl FakeBackend {
    fn new(current: Model, installed: Vec<InstalledSnap>) -> Self {
        Self {
            snapshot: DeviceSnapshot {
                current: current.identity(),
                serial: Some("serial-1".to_string()),
                seeded: true,
            },
            later_snapshot: None,
            snapshot_calls: Cell::new(0),
            current,
            installed,
            changes: Vec::new(),
            later_changes: None,
            changes_calls: Cell::new(0),
            seed: SystemSeed::None,
            highest_seen: None,
        }
    }
}

impl DeviceBackend for FakeBackend {
    fn snapshot(&self) -> anyhow::Result<DeviceSnapshot> {
        let calls = self.snapshot_calls.get();
        self.snapshot_calls.set(calls + 1);
        match &self.later_snapshot {
            Some(later) if calls > 0 => Ok(later.clone()),
            _ => Ok(self.snapshot.clone()),
        }
    }

    fn current_model(&self) -> anyhow::Result<Model> {
        Ok(self.current.clone())
    }

    fn highest_seen_revision(&self, _brand_id: &str, _model: &str) -> anyhow::Result<Option<u32>> {
        Ok(self.highest_seen)
    }

    fn installed_snaps(&self) -> anyhow::Result<Vec<InstalledSnap>> {
        Ok(self.installed.clone())
    }

    fn changes(&self) -> anyhow::Result<Vec<ChangeInfo>> {
        let calls = self.changes_calls.get();
        self.changes_calls.set(calls + 1);
        match &self.later_changes {
            Some(later) if calls > 0 => Ok(later.clone()),
            _ => Ok(self.changes.clone()),
        }
    }

    fn system_seed(&self) -> anyhow::Result<SystemSeed> {
        Ok(self.seed)
    }
}

#[derive(Default)]
struct FakeGoals {
    calls: Vec<(String, GoalTarget, GoalOptions)>,
    infos: BTreeMap<String, SnapInfo>,
    fail: Option<String>,
}

impl FakeGoals {
    fn record(&mut self, op: &str, target: &GoalTarget, options: &GoalOptions) -> anyhow::Result<()> {
        self.calls
            .push((op.to_string(), target.clone(), options.clone()));
        if self.fail.as_deref() == Some(target.name.as_str()) {
            return Err(anyhow!("cannot {op} snap {}", target.name));
        }
        Ok(())
    }

    fn download_set(
        &mut self,
        graph: &mut TaskGraph,
        op: &str,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> anyhow::Result<TaskSet> {
        self.record(op, target, options)?;
        let download = graph.new_task("fake-download", format!("Download {}", target.name));
        let validate = graph.new_task("validate-snap", format!("Validate {}", target.name));
        graph.wait_for(validate, download)?;
        let install = graph.new_task(&format!("fake-{op}"), format!("Install {}", target.name));
        graph.wait_for(install, validate)?;

        let mut set = TaskSet::new([download, validate, install]);
        set.mark_edge(download, TaskEdge::Begin);
        set.mark_edge(download, TaskEdge::SnapSetup);
        set.mark_edge(validate, TaskEdge::DownloadAndChecksDone);
        set.mark_edge(install, TaskEdge::Link);
        Ok(set)
    }

    fn single_task(
        &mut self,
        graph: &mut TaskGraph,
        op: &str,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> anyhow::Result<TaskSet> {
        self.record(op, target, options)?;
        let task = graph.new_task(&format!("fake-{op}"), format!("Handle {}", target.name));
        let mut set = TaskSet::new([task]);
        set.mark_edge(task, TaskEdge::Link);
        Ok(set)
    }

    fn ops(&self) -> Vec<(String, String)> {
        self.calls
            .iter()
            .map(|(op, target, _)| (op.clone(), target.name.clone()))
            .collect()
    }
}

impl SnapGoals for FakeGoals {
    fn snap_info(&mut self, _ctx: &DeviceContext, target: &GoalTarget) -> anyhow::Result<SnapInfo> {
        Ok(self.infos.get(&target.name).cloned().unwrap_or_default())
    }

    fn install(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> anyhow::Result<TaskSet> {
        self.download_set(graph, "install", target, options)
    }

    fn update(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> anyhow::Result<TaskSet> {
        self.download_set(graph, "update", target, options)
    }

    fn switch_channel(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> anyhow::Result<TaskSet> {
        self.single_task(graph, "switch-channel", target, options)
    }

    fn link_existing(
        &mut self,
        graph: &mut TaskGraph,
        _ctx: &DeviceContext,
        target: &GoalTarget,
        options: &GoalOptions,
    ) -> anyhow::Result<TaskSet> {
        self.single_task(graph, "link", target, options)
    }
}

fn no_sets(set: &ValidationSetRef) -> anyhow::Result<ValidationSet> {
    Err(anyhow!("unexpected fetch of validation set {}", set.key()))
}

fn options() -> RemodelOptions {
    RemodelOptions::new("/nonexistent/systems", today())
}

fn waits(change: &Change, id: u32) -> Vec<u32> {
    change.tasks()[id as usize - 1]
        .wait_tasks
        .iter()
        .map(|task| task.value())
        .collect()
}

fn kinds(change: &Change) -> Vec<&str> {
    change.tasks().iter().map(|task| task.kind.as_str()).collect()
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("must write file");
    path
}

fn local_snap(name: &str, revision: Revision, path: std::path::PathBuf) -> LocalSnap {
    LocalSnap {
        side_info: SideInfo {
            name: name.to_string(),
            snap_id: Some(format!("{name}-id")),
            revision,
            channel: None,
        },
        path,
        snap_type: SnapType::App,
        base: None,
        default_providers: Vec::new(),
        sha384: None,
    }
}

const REQUIRED_SNAPS_SET: &str = r#"
account-id = "canonical"
name = "base-set"
sequence = 1
"#;

#[test]
fn dropping_a_required_snap_only_sets_the_model() {
    let current = legacy_model(0, r#"required-snaps = ["some-required-snap"]"#);
    let new = legacy_model(1, "");
    let mut snaps = legacy_installed();
    snaps.push(installed("some-required-snap", SnapType::App, 1, "stable"));
    let backend = FakeBackend::new(current, snaps);
    let mut goals = FakeGoals::default();

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect("remodel must succeed");

    assert_eq!(change.kind, "remodel");
    assert_eq!(change.summary, "Refresh model assertion from revision 0 to 1");
    assert_eq!(change.remodel_kind, RemodelKind::UpdateRemodel);
    assert_eq!(kinds(&change), vec!["set-model"]);
    assert_eq!(change.tasks()[0].summary, "Set new model assertion");
    assert_eq!(change.tasks()[0].change_id, "1");
    assert!(goals.calls.is_empty());
}

#[test]
fn new_required_snaps_chain_downloads_before_installs() {
    let current = legacy_model(0, "");
    let new = legacy_model(
        1,
        r#"required-snaps = ["new-required-snap-1", "new-required-snap-2"]"#,
    );
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect("remodel must succeed");

    assert_eq!(
        kinds(&change),
        vec![
            "fake-download",
            "validate-snap",
            "fake-install",
            "fake-download",
            "validate-snap",
            "fake-install",
            "set-model",
        ]
    );
    // install 1 waits for both validations
    assert_eq!(waits(&change, 3), vec![2, 5]);
    // install 2 waits for its validation and the previous install
    assert_eq!(waits(&change, 6), vec![5, 3]);
    // download 2 waits for validation 1
    assert_eq!(waits(&change, 4), vec![2]);
    assert_eq!(waits(&change, 7), vec![1, 2, 3, 4, 5, 6]);

    assert_eq!(
        goals.ops(),
        vec![
            ("install".to_string(), "new-required-snap-1".to_string()),
            ("install".to_string(), "new-required-snap-2".to_string()),
        ]
    );
    for (_, _, options) in &goals.calls {
        assert!(options.required);
        assert!(!options.no_re_refresh);
        assert_eq!(options.from_change, "1");
    }
}

#[test]
fn kernel_track_change_updates_kernel_first() {
    let current = legacy_model_with(0, "pc-kernel=18", "pc", "");
    let new = legacy_model_with(
        1,
        "pc-kernel=other-track",
        "pc",
        r#"required-snaps = ["new-required-snap-1"]"#,
    );
    let mut snaps = legacy_installed();
    snaps[0] = installed("pc-kernel", SnapType::Kernel, 10, "18/stable");
    let backend = FakeBackend::new(current, snaps);
    let mut goals = FakeGoals::default();

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect("remodel must succeed");

    assert_eq!(change.tasks().len(), 7);
    assert_eq!(change.tasks()[2].kind, "fake-update");
    assert_eq!(waits(&change, 3), vec![2, 5]);
    assert_eq!(waits(&change, 6), vec![5, 3]);
    assert_eq!(waits(&change, 4), vec![2]);

    let (op, target, options) = &goals.calls[0];
    assert_eq!(op, "update");
    assert_eq!(target.name, "pc-kernel");
    assert_eq!(target.channel.as_deref(), Some("other-track"));
    assert!(!options.required);
    assert!(options.no_re_refresh);
}

#[test]
fn essential_snaps_download_in_kernel_base_gadget_order() {
    let current = uc20_model(1, "dangerous", "");
    let new = parse_model(
        r#"
brand-id = "canonical"
model = "pc-model-20"
revision = 2
architecture = "amd64"
grade = "dangerous"
base = "core22"

[[snaps]]
name = "pc-kernel"
type = "kernel"
default-channel = "22"

[[snaps]]
name = "pc"
type = "gadget"
default-channel = "22"

[[snaps]]
name = "snapd"
type = "snapd"
"#,
    );
    let backend = FakeBackend::new(current, uc20_installed());
    let mut goals = FakeGoals::default();

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect("remodel must succeed");

    assert_eq!(
        goals.ops(),
        vec![
            ("update".to_string(), "pc-kernel".to_string()),
            ("install".to_string(), "core22".to_string()),
            ("update".to_string(), "pc".to_string()),
        ]
    );
    assert_eq!(change.tasks().len(), 10);
    assert_eq!(change.tasks()[9].kind, "set-model");

    // Each download starts once the previous snap is verified.
    assert_eq!(waits(&change, 4), vec![2]);
    assert_eq!(waits(&change, 7), vec![5]);
    // Installs wait for the last verification and run one at a time.
    assert_eq!(waits(&change, 3), vec![2, 8]);
    assert_eq!(waits(&change, 6), vec![5, 3, 8]);
    assert_eq!(waits(&change, 9), vec![8, 6]);
    assert_eq!(waits(&change, 10), (1..=9).collect::<Vec<u32>>());
}

#[test]
fn hybrid_classic_base_change_installs_new_base() {
    let hybrid = |revision: u32, base: &str| {
        parse_model(&format!(
            r#"
brand-id = "canonical"
model = "pc-hybrid"
revision = {revision}
architecture = "amd64"
grade = "dangerous"
classic = true
distribution = "ubuntu"
base = "{base}"

[[snaps]]
name = "pc-kernel"
type = "kernel"
default-channel = "22"

[[snaps]]
name = "pc"
type = "gadget"
default-channel = "22"
"#
        ))
    };
    let snaps = vec![
        installed("pc-kernel", SnapType::Kernel, 10, "22/stable"),
        installed("pc", SnapType::Gadget, 5, "22/stable"),
        installed("core22", SnapType::Base, 4, "latest/stable"),
    ];
    let backend = FakeBackend::new(hybrid(1, "core22"), snaps);
    let mut goals = FakeGoals::default();

    let change = remodel(
        &backend,
        &mut goals,
        no_sets,
        hybrid(2, "core24"),
        "1",
        &options(),
    )
    .expect("remodel must succeed");

    assert_eq!(
        goals.ops(),
        vec![("install".to_string(), "core24".to_string())]
    );
    assert_eq!(
        kinds(&change),
        vec!["fake-download", "validate-snap", "fake-install", "set-model"]
    );
    assert_eq!(goals.calls[0].1.snap_type, SnapType::Base);
}

#[test]
fn rereg_remodel_requests_serial_then_prepares() {
    let current = legacy_model(0, "");
    let new = parse_model(
        r#"
brand-id = "canonical"
model = "rereg-model"
architecture = "amd64"
kernel = "pc-kernel"
gadget = "pc"
"#,
    );
    let mut backend = FakeBackend::new(current, legacy_installed());
    backend.snapshot.serial = None;
    let mut goals = FakeGoals::default();

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect("remodel must succeed");

    assert_eq!(change.summary, "Remodel device to canonical/rereg-model (0)");
    assert_eq!(change.remodel_kind, RemodelKind::ReregRemodel);
    assert_eq!(kinds(&change), vec!["request-serial", "prepare-remodeling"]);
    assert_eq!(change.tasks()[0].summary, "Request new device serial");
    assert_eq!(change.tasks()[1].summary, "Prepare remodeling");
    assert_eq!(waits(&change, 2), vec![1]);
    assert!(goals.calls.is_empty());
}

#[test]
fn prepare_remodeling_plans_snaps_of_rereg_change() {
    let current = legacy_model(0, "");
    let new = parse_model(
        r#"
brand-id = "canonical"
model = "rereg-model"
architecture = "amd64"
kernel = "pc-kernel"
gadget = "pc"
required-snaps = ["new-required-snap-1"]
"#,
    );
    let mut backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    let change = remodel(&backend, &mut goals, no_sets, new, "7", &options())
        .expect("remodel must succeed");

    backend.changes = vec![change_info("7", "remodel", &["new-required-snap-1"])];
    let plan = prepare_remodeling_tasks(&backend, &mut goals, no_sets, &change, &options())
        .expect("prepare must succeed");

    assert_eq!(plan.graph.change_id(), "7");
    assert_eq!(plan.graph.len(), 4);
    let set_model = plan.graph.task(plan.set_model).expect("set-model task");
    assert_eq!(set_model.kind, "set-model");
    assert_eq!(
        plan.planned_snaps().collect::<Vec<_>>(),
        vec!["new-required-snap-1"]
    );
}

#[test]
fn rereg_refused_while_other_changes_run() {
    let current = legacy_model(0, "");
    let new = parse_model(
        r#"
brand-id = "other-brand"
model = "pc-model"
architecture = "amd64"
kernel = "pc-kernel"
gadget = "pc"
"#,
    );
    let mut backend = FakeBackend::new(current, legacy_installed());
    backend.changes = vec![change_info("3", "install-snap", &["foo"])];
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot start complete remodel, other changes are in progress"
    );
    assert!(err.is_conflict());
}

#[test]
fn concurrent_remodel_clashes() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, "");
    let mut backend = FakeBackend::new(current, legacy_installed());
    backend.changes = vec![change_info("5", "remodel", &[])];
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot start remodel, clashing with concurrent one"
    );
    match err {
        RemodelError::Conflict(conflict) => {
            assert_eq!(conflict.change_kind.as_deref(), Some("remodel"));
            assert_eq!(conflict.change_id.as_deref(), Some("5"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn remodel_clashes_with_recovery_system_creation() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, "");
    let mut backend = FakeBackend::new(current, legacy_installed());
    backend.changes = vec![change_info("2", "create-recovery-system", &[])];
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "creating recovery system in progress, no other changes allowed until this is done"
    );
}

#[test]
fn identity_change_during_planning_clashes() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, "");
    let mut backend = FakeBackend::new(current, legacy_installed());
    let mut later = backend.snapshot.clone();
    later.current.revision = 2;
    backend.later_snapshot = Some(later);
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot start remodel, clashing with concurrent remodel to canonical/pc-model (2)"
    );
}

#[test]
fn remodel_started_during_planning_clashes() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, "");
    let mut backend = FakeBackend::new(current, legacy_installed());
    backend.later_changes = Some(vec![change_info("9", "remodel", &[])]);
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert!(err.is_conflict());
    assert_eq!(
        err.to_string(),
        "cannot start remodel, clashing with concurrent one"
    );
}

#[test]
fn snap_change_in_progress_conflicts() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, r#"required-snaps = ["new-required-snap-1"]"#);
    let mut backend = FakeBackend::new(current, legacy_installed());
    backend.changes = vec![change_info("4", "refresh-snap", &["new-required-snap-1"])];
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "snap \"new-required-snap-1\" has \"refresh-snap\" change in progress"
    );
}

#[test]
fn offline_remodel_requires_local_gadget() {
    let current = legacy_model(0, "");
    let new = legacy_model_with(1, "pc-kernel", "other-gadget", "");
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    let mut opts = options();
    opts.offline = true;

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &opts)
        .expect_err("remodel must fail");
    assert_eq!(err.to_string(), "no snap file provided for \"other-gadget\"");
}

#[test]
fn offline_remodel_installs_local_snap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(dir.path(), "other-gadget_3.snap", b"gadget");
    let mut local = local_snap("other-gadget", Revision::new(3), path);
    local.snap_type = SnapType::Gadget;
    local.sha384 = Some(remodel_security::sha384_hex(b"gadget"));

    let current = legacy_model(0, "");
    let new = legacy_model_with(1, "pc-kernel", "other-gadget", "");
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    let mut opts = options();
    opts.offline = true;
    opts.local = LocalFiles::new([local], []).expect("distinct local files");

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &opts)
        .expect("remodel must succeed");
    assert_eq!(change.tasks().len(), 4);
    let (op, target, _) = &goals.calls[0];
    assert_eq!(op, "install");
    assert_eq!(target.revision, Some(Revision::new(3)));
    assert!(target.local.is_some());
}

#[test]
fn local_files_are_refused_online() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(dir.path(), "foo.snap", b"foo");
    let current = legacy_model(0, "");
    let new = legacy_model(1, "");
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    let mut opts = options();
    opts.local = LocalFiles::new([local_snap("foo", Revision::new(1), path)], [])
        .expect("distinct local files");

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &opts)
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot do an online remodel with provided local snaps or components"
    );
}

#[test]
fn local_file_digest_and_type_are_checked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(dir.path(), "foo.snap", b"foo");
    let mut snap = local_snap("foo", Revision::new(1), path.clone());
    snap.sha384 = Some("00".repeat(48));
    let err = LocalFiles::new([snap], [])
        .expect("distinct local files")
        .check()
        .expect_err("digest must mismatch");
    assert_eq!(
        err.to_string(),
        format!(
            "local snap file \"{}\" does not match expected digest",
            path.display()
        )
    );

    let not_a_file = local_snap("bar", Revision::new(1), dir.path().to_path_buf());
    let err = LocalFiles::new([not_a_file], [])
        .expect("distinct local files")
        .check()
        .expect_err("directory must be refused");
    assert_eq!(
        err.to_string(),
        format!(
            "local snap file \"{}\" is not a regular file",
            dir.path().display()
        )
    );
}

#[test]
fn local_files_must_be_distinct() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = write_file(dir.path(), "foo_1.snap", b"one");
    let second = write_file(dir.path(), "foo_2.snap", b"two");
    let err = LocalFiles::new(
        [
            local_snap("foo", Revision::new(1), first),
            local_snap("foo", Revision::new(2), second),
        ],
        [],
    )
    .expect_err("duplicate snap must be refused");
    assert_eq!(
        err.to_string(),
        "cannot use more than one local file for \"foo\""
    );

    let component = |revision| LocalComponent {
        snap: "foo".to_string(),
        component: "kmod".to_string(),
        revision: Revision::new(revision),
        path: dir.path().join("foo+kmod.comp"),
        sha384: None,
    };
    let err = LocalFiles::new([], [component(1), component(2)])
        .expect_err("duplicate component must be refused");
    assert_eq!(
        err.to_string(),
        "cannot use more than one local file for \"foo+kmod\""
    );
}

#[test]
fn older_revision_is_refused() {
    let current = legacy_model(3, "");
    let new = legacy_model(2, "");
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot remodel to older revision 2 of model canonical/pc-model (current revision 3)"
    );
}

#[test]
fn revision_below_highest_seen_is_refused() {
    let current = legacy_model(3, "");
    let new = legacy_model(4, "");
    let mut backend = FakeBackend::new(current, legacy_installed());
    backend.highest_seen = Some(5);
    let mut goals = FakeGoals::default();

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot remodel to older revision 4 of model canonical/pc-model (current revision 5)"
    );
}

#[test]
fn uc20_remodel_creates_recovery_system_before_installs() {
    let dir: TempDir = tempfile::tempdir().expect("tempdir");
    let systems_dir = dir.path().join("systems");
    let current = uc20_model(1, "dangerous", "");
    let new = uc20_model(
        2,
        "dangerous",
        r#"
[[snaps]]
name = "new-app"
"#,
    );
    let mut backend = FakeBackend::new(current, uc20_installed());
    backend.seed = SystemSeed::SystemSeed;
    let mut goals = FakeGoals::default();
    let opts = RemodelOptions::new(&systems_dir, today());

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &opts)
        .expect("remodel must succeed");

    assert_eq!(
        kinds(&change),
        vec![
            "fake-download",
            "validate-snap",
            "fake-install",
            "create-recovery-system",
            "finalize-recovery-system",
            "set-model",
        ]
    );
    assert_eq!(change.recovery_system_label.as_deref(), Some("20261016"));
    assert_eq!(
        change.tasks()[3].summary,
        "Create recovery system with label \"20261016\""
    );
    assert_eq!(waits(&change, 4), vec![2]);
    assert_eq!(waits(&change, 5), vec![4, 2]);
    assert_eq!(waits(&change, 3), vec![2, 4, 5]);
    assert_eq!(waits(&change, 6), vec![1, 2, 3, 4, 5]);

    let setup: RecoverySystemSetup = change.tasks()[3]
        .get(RECOVERY_SYSTEM_SETUP_KEY)
        .expect("setup must decode")
        .expect("setup must be present");
    assert_eq!(setup.label, "20261016");
    assert_eq!(setup.directory, systems_dir.join("20261016"));
    assert_eq!(setup.snap_setup_tasks, vec!["1".to_string()]);
    assert!(setup.test_system);
    let setup_task: TaskId = change.tasks()[4]
        .get(RECOVERY_SYSTEM_SETUP_TASK_KEY)
        .expect("setup task must decode")
        .expect("setup task must be present");
    assert_eq!(setup_task.value(), 4);

    let request = change.finalize_request();
    assert_eq!(request.change_id, "1");
    assert_eq!(request.recovery_system_label.as_deref(), Some("20261016"));
}

#[test]
fn uc20_remodel_without_changes_still_creates_recovery_system() {
    let dir = tempfile::tempdir().expect("tempdir");
    let systems_dir = dir.path().join("systems");
    fs::create_dir_all(systems_dir.join("20261016")).expect("must create label dir");
    let current = uc20_model(1, "signed", "");
    let new = uc20_model(2, "signed", "");
    let mut backend = FakeBackend::new(current, uc20_installed());
    backend.seed = SystemSeed::SystemSeed;
    let mut goals = FakeGoals::default();
    let opts = RemodelOptions::new(&systems_dir, today());

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &opts)
        .expect("remodel must succeed");

    assert_eq!(
        kinds(&change),
        vec!["create-recovery-system", "finalize-recovery-system", "set-model"]
    );
    assert_eq!(change.recovery_system_label.as_deref(), Some("20261016-0"));
    assert_eq!(waits(&change, 2), vec![1]);
    assert_eq!(waits(&change, 3), vec![1, 2]);
}

#[test]
fn seed_null_layout_skips_recovery_system() {
    let current = uc20_model(1, "dangerous", "");
    let new = uc20_model(2, "dangerous", "");
    let mut backend = FakeBackend::new(current, uc20_installed());
    backend.seed = SystemSeed::SystemSeedNull;
    let mut goals = FakeGoals::default();

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect("remodel must succeed");
    assert_eq!(kinds(&change), vec!["set-model"]);
    assert_eq!(change.recovery_system_label, None);
}

#[test]
fn self_containment_violations_are_aggregated() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, r#"required-snaps = ["new-app"]"#);
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    goals.infos.insert(
        "new-app".to_string(),
        SnapInfo {
            base: Some("core22".to_string()),
            default_providers: vec!["gtk-common-themes".to_string(), "core".to_string()],
        },
    );

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot remodel to model that is not self contained:\n - cannot use snap \"new-app\": base \"core22\" is missing\n - cannot use snap \"new-app\": default provider \"gtk-common-themes\" is missing"
    );
}

#[test]
fn goal_failure_is_reported_with_snap() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, r#"required-snaps = ["new-app"]"#);
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals {
        fail: Some("new-app".to_string()),
        ..FakeGoals::default()
    };

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect_err("remodel must fail");
    match err {
        RemodelError::Other(err) => assert_eq!(
            format!("{err:#}"),
            "cannot plan install of snap \"new-app\": cannot install snap new-app"
        ),
        other => panic!("unexpected error: {other}"),
    }
}

fn pinning_set(pins: &[(&str, i32)]) -> ValidationSet {
    let mut input = REQUIRED_SNAPS_SET.to_string();
    for (name, revision) in pins {
        input.push_str(&format!(
            "\n[[snaps]]\nname = \"{name}\"\npresence = \"required\"\nrevision = {revision}\n"
        ));
    }
    ValidationSet::from_toml_str(&input).expect("validation set must parse")
}

const ENFORCED_SET: &str = r#"
[[validation-sets]]
account-id = "canonical"
name = "base-set"
mode = "enforce"

[[validation-sets]]
account-id = "canonical"
name = "extra-set"
"#;

#[test]
fn pinned_cached_gadget_is_relinked_with_assets() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, ENFORCED_SET);
    let mut snaps = legacy_installed();
    snaps[1].sequence = vec![Revision::new(3), Revision::new(5)];
    snaps[2].sequence = vec![Revision::new(2), Revision::new(4)];
    let backend = FakeBackend::new(current, snaps);
    let mut goals = FakeGoals::default();
    let mut fetched = Vec::new();
    let set = pinning_set(&[("pc", 3), ("core", 2)]);

    let change = remodel(
        &backend,
        &mut goals,
        |set_ref: &ValidationSetRef| {
            fetched.push(set_ref.key());
            Ok(set.clone())
        },
        new,
        "1",
        &options(),
    )
    .expect("remodel must succeed");

    assert_eq!(fetched, vec!["canonical/base-set".to_string()]);
    assert_eq!(
        kinds(&change),
        vec![
            "fake-link",
            "fake-link",
            "update-gadget-assets",
            "update-gadget-cmdline",
            "set-model",
        ]
    );
    assert_eq!(change.tasks()[2].summary, "Update assets from gadget \"pc\" (3)");
    assert_eq!(
        change.tasks()[3].summary,
        "Update kernel command line from gadget \"pc\" (3)"
    );
    // gadget link waits for the base link
    assert_eq!(waits(&change, 2), vec![1]);
    assert_eq!(waits(&change, 3), vec![2, 1]);
    assert_eq!(waits(&change, 4), vec![3]);
    assert_eq!(
        goals.ops(),
        vec![
            ("link".to_string(), "core".to_string()),
            ("link".to_string(), "pc".to_string()),
        ]
    );
    assert_eq!(goals.calls[1].1.revision, Some(Revision::new(3)));
}

#[test]
fn pinned_cached_kernel_gets_kernel_assets() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, ENFORCED_SET);
    let mut snaps = legacy_installed();
    snaps[0].sequence = vec![Revision::new(8), Revision::new(10)];
    let backend = FakeBackend::new(current, snaps);
    let mut goals = FakeGoals::default();
    let set = pinning_set(&[("pc-kernel", 8)]);

    let change = remodel(
        &backend,
        &mut goals,
        |_: &ValidationSetRef| Ok(set.clone()),
        new,
        "1",
        &options(),
    )
    .expect("remodel must succeed");

    assert_eq!(
        kinds(&change),
        vec!["fake-link", "update-kernel-assets", "set-model"]
    );
    assert_eq!(
        change.tasks()[1].summary,
        "Update assets from kernel \"pc-kernel\" (8)"
    );
    assert_eq!(waits(&change, 2), vec![1]);
}

#[test]
fn pinned_current_revision_on_new_track_switches_channel() {
    let current = legacy_model_with(0, "pc-kernel=18", "pc", "");
    let new = legacy_model_with(1, "pc-kernel=20", "pc", ENFORCED_SET);
    let mut snaps = legacy_installed();
    snaps[0] = installed("pc-kernel", SnapType::Kernel, 10, "18/stable");
    let backend = FakeBackend::new(current, snaps);
    let mut goals = FakeGoals::default();
    let set = pinning_set(&[("pc-kernel", 10)]);

    let change = remodel(
        &backend,
        &mut goals,
        |_: &ValidationSetRef| Ok(set.clone()),
        new,
        "1",
        &options(),
    )
    .expect("remodel must succeed");

    assert_eq!(kinds(&change), vec!["fake-switch-channel", "set-model"]);
    let (_, target, _) = &goals.calls[0];
    assert_eq!(target.channel.as_deref(), Some("20"));
    assert_eq!(target.revision, Some(Revision::new(10)));
}

#[test]
fn offline_pin_without_cached_revision_fails() {
    let current = legacy_model(0, "");
    let new = legacy_model(1, ENFORCED_SET);
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    let mut opts = options();
    opts.offline = true;
    let set = pinning_set(&[("pc-kernel", 12)]);

    let err = remodel(
        &backend,
        &mut goals,
        |_: &ValidationSetRef| Ok(set.clone()),
        new,
        "1",
        &opts,
    )
    .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "snap \"pc-kernel\" is installed at revision 10 but validation sets require revision 12, which is not available offline"
    );
}

#[test]
fn offline_unasserted_local_snap_cannot_match_pin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(dir.path(), "new-app.snap", b"app");
    let mut local = local_snap("new-app", Revision::local(1), path);
    local.side_info.snap_id = None;

    let current = legacy_model(0, "");
    let new = legacy_model(
        1,
        &format!("required-snaps = [\"new-app\"]\n{ENFORCED_SET}"),
    );
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    let mut opts = options();
    opts.offline = true;
    opts.local = LocalFiles::new([local], []).expect("distinct local files");
    let set = pinning_set(&[("new-app", 4)]);

    let err = remodel(
        &backend,
        &mut goals,
        |_: &ValidationSetRef| Ok(set.clone()),
        new,
        "1",
        &opts,
    )
    .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "cannot match unasserted local snap \"new-app\" against revision 4 required by validation sets"
    );
}

#[test]
fn dropped_snap_still_required_by_validation_sets() {
    let current = legacy_model(0, r#"required-snaps = ["some-required-snap"]"#);
    let new = legacy_model(1, ENFORCED_SET);
    let mut snaps = legacy_installed();
    snaps.push(installed("some-required-snap", SnapType::App, 5, "stable"));
    let backend = FakeBackend::new(current.clone(), snaps.clone());
    let mut goals = FakeGoals::default();
    let set = pinning_set(&[("some-required-snap", 7)]);

    let err = remodel(
        &backend,
        &mut goals,
        |_: &ValidationSetRef| Ok(set.clone()),
        new.clone(),
        "1",
        &options(),
    )
    .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "snap \"some-required-snap\" required by validation sets is missing from the new model"
    );

    snaps[3].current = Revision::new(7);
    let backend = FakeBackend::new(current, snaps);
    let change = remodel(
        &backend,
        &mut goals,
        |_: &ValidationSetRef| Ok(set.clone()),
        new,
        "1",
        &options(),
    )
    .expect("retained snap satisfies the set");
    assert_eq!(kinds(&change), vec!["set-model"]);
}

#[test]
fn invalid_snap_cannot_be_required() {
    let current = legacy_model(0, "");
    let new = legacy_model(
        1,
        &format!("required-snaps = [\"banned\"]\n{ENFORCED_SET}"),
    );
    let backend = FakeBackend::new(current, legacy_installed());
    let mut goals = FakeGoals::default();
    let set = ValidationSet::from_toml_str(&format!(
        "{REQUIRED_SNAPS_SET}\n[[snaps]]\nname = \"banned\"\npresence = \"invalid\"\n"
    ))
    .expect("validation set must parse");

    let err = remodel(
        &backend,
        &mut goals,
        |_: &ValidationSetRef| Ok(set.clone()),
        new,
        "1",
        &options(),
    )
    .expect_err("remodel must fail");
    assert_eq!(
        err.to_string(),
        "snap \"banned\" is required by the new model but invalid in validation sets"
    );
}

const COMPONENT_SNAP: &str = r#"
[[snaps]]
name = "foo"

[snaps.components]
kmod = "required"
debug = "optional"
"#;

#[test]
fn required_component_is_added_to_installed_snap() {
    let current = uc20_model(1, "dangerous", "");
    let new = uc20_model(2, "dangerous", COMPONENT_SNAP);
    let mut snaps = uc20_installed();
    snaps.push(installed("foo", SnapType::App, 2, "latest/stable"));
    let backend = FakeBackend::new(current, snaps);
    let mut goals = FakeGoals::default();

    let change = remodel(&backend, &mut goals, no_sets, new, "1", &options())
        .expect("remodel must succeed");

    assert_eq!(kinds(&change), vec!["fake-link", "set-model"]);
    let (op, target, _) = &goals.calls[0];
    assert_eq!(op, "link");
    assert_eq!(target.name, "foo");
    assert_eq!(target.revision, Some(Revision::new(2)));
    assert_eq!(
        target.components,
        vec![ComponentAction {
            name: "kmod".to_string(),
            kind: ComponentActionKind::Install,
            revision: None,
            local: None,
        }]
    );
}

#[test]
fn offline_component_needs_local_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_file(dir.path(), "foo.snap", b"foo");
    let current = uc20_model(1, "dangerous", "");
    let new = uc20_model(2, "dangerous", COMPONENT_SNAP);
    let backend = FakeBackend::new(current, uc20_installed());
    let mut goals = FakeGoals::default();
    let mut opts = options();
    opts.offline = true;
    opts.local = LocalFiles::new([local_snap("foo", Revision::new(2), path)], [])
        .expect("distinct local files");

    let err = remodel(&backend, &mut goals, no_sets, new, "1", &opts)
        .expect_err("remodel must fail");
    assert_eq!(err.to_string(), "no component file provided for \"foo+kmod\"");
}

#[test]
fn offline_component_from_local_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let snap_path = write_file(dir.path(), "foo.snap", b"foo");
    let comp_path = write_file(dir.path(), "foo+kmod.comp", b"kmod");
    let current = uc20_model(1, "dangerous", "");
    let new = uc20_model(2, "dangerous", COMPONENT_SNAP);
    let backend = FakeBackend::new(current, uc20_installed());
    let mut goals = FakeGoals::default();
    let mut opts = options();
    opts.offline = true;
    opts.local = LocalFiles::new(
        [local_snap("foo", Revision::new(2), snap_path)],
        [LocalComponent {
            snap: "foo".to_string(),
            component: "kmod".to_string(),
            revision: Revision::new(6),
            path: comp_path,
            sha384: None,
        }],
    )
    .expect("distinct local files");

    remodel(&backend, &mut goals, no_sets, new, "1", &opts).expect("remodel must succeed");
    let (_, target, _) = &goals.calls[0];
    assert_eq!(target.components.len(), 1);
    assert_eq!(target.components[0].name, "kmod");
    assert_eq!(target.components[0].revision, Some(Revision::new(6)));
}

fn facts() -> TransitionFacts {
    TransitionFacts {
        seeded: true,
        has_serial: true,
        ..TransitionFacts::default()
    }
}

#[test]
fn transition_rules_report_exact_messages() {
    let legacy = legacy_model(1, "");
    let classic = parse_model(
        r#"
brand-id = "canonical"
model = "pc-model"
revision = 1
architecture = "amd64"
classic = true
"#,
    );
    let mut arm = legacy_model(2, "");
    arm.architecture = "arm64".to_string();
    let mut with_base = legacy_model(2, "");
    with_base.base = Some("core18".to_string());
    let rereg = parse_model(
        r#"
brand-id = "other"
model = "pc-model"
revision = 1
architecture = "amd64"
kernel = "pc-kernel"
gadget = "pc"
"#,
    );

    let cases: Vec<(&Model, &Model, TransitionFacts, &str)> = vec![
        (
            &legacy,
            &legacy,
            TransitionFacts {
                seeded: false,
                ..facts()
            },
            "cannot remodel until fully seeded",
        ),
        (
            &legacy,
            &arm,
            facts(),
            "cannot remodel to different architectures yet",
        ),
        (
            &legacy,
            &with_base,
            facts(),
            "cannot remodel from core to bases yet",
        ),
        (&with_base, &legacy, facts(), "cannot remodel from bases to core"),
        (
            &classic,
            &legacy,
            facts(),
            "cannot remodel from classic to non-classic models",
        ),
        (
            &legacy,
            &classic,
            facts(),
            "cannot remodel from non-classic to classic models",
        ),
        (
            &classic,
            &classic,
            facts(),
            "cannot remodel classic models without kernel and gadget snaps",
        ),
        (
            &legacy,
            &legacy,
            TransitionFacts {
                has_serial: false,
                ..facts()
            },
            "cannot remodel without a serial",
        ),
        (
            &legacy,
            &rereg,
            TransitionFacts {
                offline: true,
                ..facts()
            },
            "cannot remodel offline to different brand ID or model",
        ),
    ];

    for (current, new, facts, message) in cases {
        let err = validate_transition(current, new, &facts).expect_err(message);
        assert_eq!(err.to_string(), message);
    }
}

#[test]
fn uc20_boundary_and_grade_rules() {
    let legacy = legacy_model(1, "");
    let dangerous = uc20_model(1, "dangerous", "");
    let signed = uc20_model(2, "signed", "");
    let dangerous_next = uc20_model(3, "dangerous", "");

    let err = validate_transition(&legacy, &dangerous, &facts()).expect_err("upgrade refused");
    assert_eq!(err.to_string(), "cannot remodel from pre-UC20 to UC20+ models");
    let allowed = TransitionFacts {
        allow_uc20_upgrade: true,
        ..facts()
    };
    validate_transition(&legacy, &dangerous, &allowed).expect("upgrade allowed explicitly");

    let err = validate_transition(&dangerous, &legacy, &allowed).expect_err("downgrade refused");
    assert_eq!(err.to_string(), "cannot remodel from UC20+ to pre-UC20 models");

    validate_transition(&dangerous, &signed, &facts()).expect("grade may go up");
    let err = validate_transition(&signed, &dangerous_next, &facts()).expect_err("grade down");
    assert_eq!(
        err.to_string(),
        "cannot remodel from grade signed to grade dangerous"
    );
}

#[test]
fn rereg_only_checks_highest_seen_revision() {
    let current = legacy_model(5, "");
    let rereg = parse_model(
        r#"
brand-id = "other"
model = "pc-model"
revision = 1
architecture = "amd64"
kernel = "pc-kernel"
gadget = "pc"
"#,
    );
    let no_serial = TransitionFacts {
        has_serial: false,
        ..facts()
    };
    validate_transition(&current, &rereg, &no_serial).expect("rereg needs no serial");

    let seen = TransitionFacts {
        highest_seen_revision: Some(2),
        ..no_serial
    };
    let err = validate_transition(&current, &rereg, &seen).expect_err("older rereg target");
    assert_eq!(
        err.to_string(),
        "cannot remodel to older revision 1 of model other/pc-model (current revision 2)"
    );
}

#[test]
fn remodel_kind_and_store_follow_identity() {
    let current = legacy_model(1, "");
    let same = legacy_model(2, "");
    let mut store_switch = legacy_model(2, "");
    store_switch.store = Some("brand-store".to_string());
    let mut rereg = legacy_model(2, "");
    rereg.model = "other-model".to_string();

    let ctx = DeviceContext::for_remodel(current.clone(), same, SystemSeed::None);
    assert_eq!(ctx.kind(), RemodelKind::UpdateRemodel);
    assert_eq!(ctx.store(), None);

    let ctx = DeviceContext::for_remodel(current.clone(), store_switch, SystemSeed::None);
    assert_eq!(ctx.kind(), RemodelKind::StoreSwitchRemodel);
    assert_eq!(ctx.store(), Some("brand-store"));
    assert_eq!(ctx.kind().to_string(), "store switch remodel");

    let ctx = DeviceContext::for_remodel(current, rereg, SystemSeed::None);
    assert_eq!(ctx.kind(), RemodelKind::ReregRemodel);
    assert_eq!(ctx.store(), Some(DEFAULT_STORE));
}

fn layout_with(size: u64, role: Option<&str>) -> GadgetLayout {
    let mut volumes = BTreeMap::new();
    volumes.insert(
        "pc".to_string(),
        GadgetVolume {
            schema: Some("gpt".to_string()),
            bootloader: Some("grub".to_string()),
            structures: vec![GadgetStructure {
                name: "foo".to_string(),
                size,
                role: role.map(str::to_string),
            }],
        },
    );
    GadgetLayout { volumes }
}

#[test]
fn gadget_compatibility_is_checked_only_when_remodeling() {
    let current = uc20_model(1, "dangerous", "");
    let new = uc20_model(2, "dangerous", "");
    let layout = layout_with(10485760, None);
    let failing = |_: &GadgetLayout, _: &GadgetLayout| -> anyhow::Result<()> { Err(anyhow!("fail")) };

    let ctx = DeviceContext::for_remodel(current.clone(), new, SystemSeed::SystemSeed);
    let err = check_gadget_remodel_compatible(&ctx, &layout, &layout, &failing)
        .expect_err("checker failure must surface");
    assert_eq!(err.to_string(), "cannot remodel to an incompatible gadget: fail");

    let ground = DeviceContext::ground(current, SystemSeed::SystemSeed);
    check_gadget_remodel_compatible(&ground, &layout, &layout, &failing)
        .expect("no check outside a remodel");
}

#[test]
fn structure_size_change_is_incompatible() {
    let current = uc20_model(1, "dangerous", "");
    let new = uc20_model(2, "dangerous", "");
    let ctx = DeviceContext::for_remodel(current, new, SystemSeed::SystemSeed);

    let err = check_gadget_remodel_compatible(
        &ctx,
        &layout_with(10485760, None),
        &layout_with(20971520, None),
        &StructureLayoutChecker,
    )
    .expect_err("size change must be refused");
    assert_eq!(
        err.to_string(),
        "cannot remodel to an incompatible gadget: incompatible layout change: incompatible structure #0 (\"foo\") change: cannot change structure size from 10485760 to 20971520"
    );

    check_gadget_remodel_compatible(
        &ctx,
        &layout_with(10485760, Some("system-seed")),
        &layout_with(10485760, Some("system-seed")),
        &StructureLayoutChecker,
    )
    .expect("unchanged layout is compatible");
}

#[test]
fn gadget_layout_reports_seed_role() {
    assert_eq!(
        layout_with(1, Some(ROLE_SYSTEM_SEED)).system_seed(),
        SystemSeed::SystemSeed
    );
    assert_eq!(
        layout_with(1, Some(ROLE_SYSTEM_SEED_NULL)).system_seed(),
        SystemSeed::SystemSeedNull
    );
    assert_eq!(layout_with(1, Some("system-data")).system_seed(), SystemSeed::None);

    let parsed = GadgetLayout::from_toml_str(
        r#"
[volumes.pc]
schema = "gpt"

[[volumes.pc.structure]]
name = "ubuntu-seed"
size = 1258291200
role = "system-seed"
"#,
    )
    .expect("layout must parse");
    assert_eq!(parsed.system_seed(), SystemSeed::SystemSeed);
}

#[test]
fn no_longer_required_lists_apps_bases_and_kernels() {
    let new = legacy_model(1, r#"required-snaps = ["kept"]"#);
    let mut snaps = legacy_installed();
    snaps.push(installed("kept", SnapType::App, 1, "stable"));
    snaps.push(installed("old-app", SnapType::App, 1, "stable"));
    snaps.push(installed("core18", SnapType::Base, 1, "stable"));
    snaps.push(installed("old-gadget", SnapType::Gadget, 1, "stable"));
    let mut optional = installed("unrequired", SnapType::App, 1, "stable");
    optional.required = false;
    snaps.push(optional);

    assert_eq!(
        no_longer_required(&new, &snaps),
        vec!["core18".to_string(), "old-app".to_string()]
    );
}

#[test]
fn remodeling_reports_pending_remodels_only() {
    let mut done = change_info("1", "remodel", &[]);
    done.ready = true;
    assert!(!remodeling(&[done.clone()]));
    assert!(remodeling(&[done, change_info("2", "remodel", &[])]));
    assert!(!remodeling(&[change_info("3", "install-snap", &[])]));
}

#[test]
fn task_graph_refuses_bad_waits() {
    let mut graph = TaskGraph::new("1");
    let first = graph.new_task("a", "A");
    let second = graph.new_task("b", "B");
    graph.wait_for(second, first).expect("valid wait");
    graph.wait_for(second, first).expect("repeated wait");
    assert_eq!(graph.task(second).expect("task").wait_tasks, vec![first]);

    let err = graph.wait_for(first, first).expect_err("self wait");
    assert_eq!(err.to_string(), "task 1 cannot wait for itself");

    let mut other = TaskGraph::new("2");
    other.new_task("c", "C");
    other.new_task("d", "D");
    let unknown = other.new_task("e", "E");
    let err = graph.wait_for(first, unknown).expect_err("unknown task");
    assert_eq!(err.to_string(), "unknown task 3 in change 1");
}

#[test]
fn task_set_phases_split_after_download_edge() {
    let mut graph = TaskGraph::new("1");
    let download = graph.new_task("download", "Download");
    let validate = graph.new_task("validate", "Validate");
    let link = graph.new_task("link", "Link");
    let mut set = TaskSet::new([download, validate, link]);

    let (before, after) = set.phases();
    assert!(before.is_empty());
    assert_eq!(after, &[download, validate, link]);

    set.mark_edge(validate, TaskEdge::DownloadAndChecksDone);
    let (before, after) = set.phases();
    assert_eq!(before, &[download, validate]);
    assert_eq!(after, &[link]);
    assert_eq!(set.snap_setup(), Some(validate));

    set.mark_edge(download, TaskEdge::LastBeforeLocalModifications);
    assert_eq!(set.download_done(), Some(download));
}
