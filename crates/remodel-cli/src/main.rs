use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use remodel_core::{
    LocalComponent, LocalSnap, Model, Revision, SideInfo, ValidationSet, ValidationSetRef,
};
use remodel_planner::{
    check_gadget_remodel_compatible, no_longer_required, remodel, validate_transition, Change,
    DeviceBackend, DeviceContext, LocalFiles, RemodelOptions, StructureLayoutChecker,
    TransitionFacts,
};
use remodel_state::{
    pick_recovery_system_label, DeviceStateStore, ResealRequest, SetModelFinalizer,
};
use tracing::{info, Level};

mod config;
mod device;
mod goals;
mod render;
mod telemetry;

use config::{LogFormat, RemodelConfig};
use device::{load_gadget_layout, load_model, DeviceFile, FileBackend};
use goals::DemoGoals;
use render::{current_output_style, format_change_lines, format_finalize_lines, render_status_line};

#[derive(Parser, Debug)]
#[command(name = "remodel")]
#[command(about = "Plan and commit device model transitions", long_about = None)]
struct Cli {
    #[arg(long, env = "REMODEL_CONFIG")]
    config: Option<PathBuf>,
    /// Device root; overrides the config value.
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct TransitionArgs {
    #[arg(long)]
    current: PathBuf,
    #[arg(long)]
    new: PathBuf,
    #[arg(long)]
    device: PathBuf,
    #[arg(long)]
    offline: bool,
    /// Local snap file as `name[@revision]=path`.
    #[arg(long = "snap")]
    snaps: Vec<String>,
    /// Local component file as `snap+component[@revision]=path`.
    #[arg(long = "component")]
    components: Vec<String>,
    #[arg(long)]
    allow_uc20_upgrade: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether the transition is allowed at all.
    Check {
        #[command(flatten)]
        transition: TransitionArgs,
    },
    /// Build the remodel change and print its tasks.
    Plan {
        #[command(flatten)]
        transition: TransitionArgs,
        #[arg(long, default_value = "1")]
        change_id: String,
        /// Validation set TOML files the enforced sets are looked up in.
        #[arg(long = "validation-set")]
        validation_sets: Vec<PathBuf>,
        /// Gadget layout of the running gadget.
        #[arg(long)]
        gadget_layout: Option<PathBuf>,
        /// Gadget layout of the gadget the new model brings.
        #[arg(long, requires = "gadget_layout")]
        new_gadget_layout: Option<PathBuf>,
        /// Print the change as JSON instead of a task list.
        #[arg(long)]
        json: bool,
    },
    /// Print the next free recovery system label.
    Label {
        #[arg(long)]
        systems_dir: Option<PathBuf>,
    },
    /// Commit a planned change to the boot state.
    Finalize {
        /// Change JSON produced by `plan --json`.
        #[arg(long)]
        change: PathBuf,
        /// Device description used to report snaps that are no longer required.
        #[arg(long)]
        device: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RemodelConfig::load(cli.config.as_deref())?.with_root(cli.root.clone());
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    telemetry::init_tracing(config.log_format == LogFormat::Json, level);
    run_cli(cli, &config)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Parses `name[@revision]=path`. A revision marks the file as asserted.
fn parse_local_spec(spec: &str) -> Result<(String, Option<Revision>, PathBuf)> {
    let (name, path) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid local file '{spec}': expected name=path"))?;
    if path.is_empty() {
        return Err(anyhow!("invalid local file '{spec}': empty path"));
    }
    let (name, revision) = match name.split_once('@') {
        Some((name, revision)) => (name, Some(Revision::parse(revision)?)),
        None => (name, None),
    };
    if name.is_empty() {
        return Err(anyhow!("invalid local file '{spec}': empty name"));
    }
    Ok((name.to_string(), revision, PathBuf::from(path)))
}

fn parse_local_snap(spec: &str) -> Result<LocalSnap> {
    let (name, revision, path) = parse_local_spec(spec)?;
    let side_info = match revision {
        Some(revision) => SideInfo {
            snap_id: Some(name.clone()),
            name,
            revision,
            channel: None,
        },
        None => SideInfo {
            name,
            snap_id: None,
            revision: Revision::local(1),
            channel: None,
        },
    };
    Ok(LocalSnap {
        side_info,
        path,
        snap_type: Default::default(),
        base: None,
        default_providers: Vec::new(),
        sha384: None,
    })
}

fn parse_local_component(spec: &str) -> Result<LocalComponent> {
    let (reference, revision, path) = parse_local_spec(spec)?;
    let (snap, component) = reference
        .split_once('+')
        .ok_or_else(|| anyhow!("invalid local component '{spec}': expected snap+component"))?;
    Ok(LocalComponent {
        snap: snap.to_string(),
        component: component.to_string(),
        revision: revision.unwrap_or(Revision::local(1)),
        path,
        sha384: None,
    })
}

fn load_validation_sets(paths: &[PathBuf]) -> Result<Vec<ValidationSet>> {
    paths
        .iter()
        .map(|path| {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed reading validation set: {}", path.display()))?;
            ValidationSet::from_toml_str(&content)
                .with_context(|| format!("failed loading validation set: {}", path.display()))
        })
        .collect()
}

fn find_validation_set(sets: &[ValidationSet], wanted: &ValidationSetRef) -> Result<ValidationSet> {
    sets.iter()
        .filter(|set| set.key() == wanted.key())
        .filter(|set| wanted.sequence.map_or(true, |sequence| set.sequence == sequence))
        .max_by_key(|set| set.sequence)
        .cloned()
        .ok_or_else(|| anyhow!("validation set {} is not available", wanted.key()))
}

struct Transition {
    backend: FileBackend,
    new_model: Model,
    options: RemodelOptions,
}

fn load_transition(args: &TransitionArgs, config: &RemodelConfig) -> Result<Transition> {
    let current = load_model(&args.current)?;
    let new_model = load_model(&args.new)?;
    let device = DeviceFile::load(&args.device)?;
    let layout = config.layout();
    let backend = FileBackend::new(current, device, DeviceStateStore::new(layout.clone()));

    let snaps = args
        .snaps
        .iter()
        .map(|spec| parse_local_snap(spec))
        .collect::<Result<Vec<_>>>()?;
    let components = args
        .components
        .iter()
        .map(|spec| parse_local_component(spec))
        .collect::<Result<Vec<_>>>()?;

    let mut options = RemodelOptions::new(layout.systems_dir(), today());
    options.offline = args.offline;
    options.local = LocalFiles::new(snaps, components)?;
    options.label_probe_limit = config.label_probe_limit;
    options.allow_uc20_upgrade = args.allow_uc20_upgrade;
    Ok(Transition {
        backend,
        new_model,
        options,
    })
}

fn check_transition(transition: &Transition) -> Result<()> {
    let backend = &transition.backend;
    let snapshot = backend.snapshot()?;
    let facts = TransitionFacts {
        seeded: snapshot.seeded,
        has_serial: snapshot.serial.is_some(),
        offline: transition.options.offline,
        has_local_files: !transition.options.local.is_empty(),
        highest_seen_revision: backend.highest_seen_revision(
            &transition.new_model.brand_id,
            &transition.new_model.model,
        )?,
        allow_uc20_upgrade: transition.options.allow_uc20_upgrade,
    };
    validate_transition(&backend.current_model()?, &transition.new_model, &facts)?;
    Ok(())
}

fn run_cli(cli: Cli, config: &RemodelConfig) -> Result<()> {
    let style = current_output_style();
    match cli.command {
        Commands::Check { transition } => {
            let transition = load_transition(&transition, config)?;
            check_transition(&transition)?;
            println!("{}", render_status_line(style, "ok", "ok"));
        }
        Commands::Plan {
            transition,
            change_id,
            validation_sets,
            gadget_layout,
            new_gadget_layout,
            json,
        } => {
            let mut transition = load_transition(&transition, config)?;
            if let Some(path) = gadget_layout.as_deref() {
                transition.backend = transition
                    .backend
                    .with_gadget_layout(load_gadget_layout(path)?);
            }
            if let (Some(path), Some(current)) =
                (new_gadget_layout.as_deref(), transition.backend.gadget_layout())
            {
                let update = load_gadget_layout(path)?;
                let ctx = DeviceContext::for_remodel(
                    transition.backend.current_model()?,
                    transition.new_model.clone(),
                    transition.backend.system_seed()?,
                );
                check_gadget_remodel_compatible(&ctx, current, &update, &StructureLayoutChecker)?;
            }

            let sets = load_validation_sets(&validation_sets)?;
            let mut goals = DemoGoals;
            let change = remodel(
                &transition.backend,
                &mut goals,
                |wanted: &ValidationSetRef| find_validation_set(&sets, wanted),
                transition.new_model,
                &change_id,
                &transition.options,
            )?;
            info!(change_id = %change.id, tasks = change.tasks().len(), "change planned");

            if json {
                let encoded = serde_json::to_string_pretty(&change)
                    .context("failed serializing change")?;
                println!("{encoded}");
            } else {
                for line in format_change_lines(&change, style) {
                    println!("{line}");
                }
            }
        }
        Commands::Label { systems_dir } => {
            let systems_dir = systems_dir.unwrap_or_else(|| config.layout().systems_dir());
            let label =
                pick_recovery_system_label(&systems_dir, today(), config.label_probe_limit)?;
            println!("{label}");
        }
        Commands::Finalize { change, device } => {
            let change = load_change(&change)?;
            let layout = config.layout();
            layout.ensure_base_dirs()?;

            let resealer = |request: &ResealRequest| -> Result<()> {
                info!(change_id = %change.id, "resealing boot keys for {request}");
                Ok(())
            };
            let mut finalizer = SetModelFinalizer::new(layout, resealer)
                .with_reseal_attempts(config.reseal_attempts);
            let mut log = Vec::new();
            let stage = finalizer.run(&change.finalize_request(), &mut log)?;

            let dropped = match device.as_deref() {
                Some(path) => {
                    no_longer_required(&change.new_model, &DeviceFile::load(path)?.installed)
                }
                None => Vec::new(),
            };
            for line in format_finalize_lines(&change.id, stage, &log, &dropped, style) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn load_change(path: &Path) -> Result<Change> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading change: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed parsing change: {}", path.display()))
}
