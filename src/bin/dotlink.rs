// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotlink::{
    config::{Link, Profile},
    path::{backup_dir, default_data_dir, home_dir, state_dir},
    ActionKind, Deployer, DeploymentState, Manifest, StateStore,
};

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotlink [options] <dotlink-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to manifest file.
    #[arg(
        short,
        long,
        global = true,
        value_name = "path",
        default_value = "dotlink.toml"
    )]
    pub manifest: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Init(opts) => run_init(&self.manifest, opts),
            Command::Deploy(opts) => run_deploy(&self.manifest, opts),
            Command::Rollback(opts) => run_rollback(&self.manifest, opts),
            Command::Status(opts) => run_status(&self.manifest, opts),
            Command::History(opts) => run_history(&self.manifest, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write a starter manifest.
    #[command(override_usage = "dotlink init [options] <profile_name>")]
    Init(InitOptions),

    /// Deploy profiles listed in manifest.
    #[command(override_usage = "dotlink deploy [options] [<profile_name>]...")]
    Deploy(DeployOptions),

    /// Roll back a recorded deployment of a profile.
    #[command(override_usage = "dotlink rollback [options] <profile_name>")]
    Rollback(RollbackOptions),

    /// Show drift between deployed profiles and the file system.
    #[command(override_usage = "dotlink status [options] [<profile_name>]...")]
    Status(StatusOptions),

    /// List recorded deployments of a profile.
    #[command(override_usage = "dotlink history [options] <profile_name>")]
    History(HistoryOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Name of first profile to list in manifest.
    #[arg(required = true, value_name = "profile_name")]
    pub profile_name: String,

    /// Brief description of profile.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    /// Names of profiles to deploy.
    #[arg(group = "target", value_name = "profile_name")]
    pub profile_names: Vec<String>,

    /// Deploy every profile in manifest.
    #[arg(short, long, group = "target")]
    pub all: bool,

    /// Show what would be done without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RollbackOptions {
    /// Name of profile to roll back.
    #[arg(required = true, value_name = "profile_name")]
    pub profile_name: String,

    /// Roll back recorded run with this id instead of the most recent one.
    #[arg(short, long, value_name = "run_id")]
    pub id: Option<String>,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would be undone without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Names of profiles to check, every known profile if omitted.
    #[arg(value_name = "profile_name")]
    pub profile_names: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct HistoryOptions {
    /// Name of profile to list recorded deployments of.
    #[arg(required = true, value_name = "profile_name")]
    pub profile_name: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

/// Everything a command needs, resolved from the manifest.
struct Context {
    manifest: Manifest,
    root: PathBuf,
    home: PathBuf,
    deployer: Deployer,
    store: StateStore,
}

impl Context {
    /// Load context from manifest, which must exist.
    fn load(manifest_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(manifest_path)
            .with_context(|| format!("failed to read manifest {:?}", manifest_path.display()))?;
        let manifest: Manifest = content.parse()?;

        // INVARIANT: Sources resolve against an absolute repository root.
        let root = manifest_path
            .canonicalize()?
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("manifest {:?} has no parent", manifest_path.display()))?;

        Self::with_manifest(manifest, root)
    }

    /// Load context from manifest, falling back to defaults if it is absent.
    fn load_or_default(manifest_path: &Path) -> Result<Self> {
        if manifest_path.is_file() {
            return Self::load(manifest_path);
        }

        Self::with_manifest(Manifest::default(), std::env::current_dir()?)
    }

    fn with_manifest(manifest: Manifest, root: PathBuf) -> Result<Self> {
        let data_dir = match &manifest.settings.data_dir {
            Some(data_dir) => data_dir.clone(),
            None => default_data_dir()?,
        };

        Ok(Self {
            manifest,
            root,
            home: home_dir()?,
            deployer: Deployer::new(backup_dir(&data_dir)),
            store: StateStore::open(state_dir(&data_dir))?,
        })
    }

    fn latest_or(&self, profile: &str, id: Option<String>) -> Result<DeploymentState> {
        match id {
            Some(id) => Ok(self.store.load(profile, id)?),
            None => self
                .store
                .latest(profile)?
                .ok_or_else(|| anyhow!("profile {profile:?} has no recorded deployment")),
        }
    }
}

fn run_init(manifest_path: &Path, opts: InitOptions) -> Result<()> {
    if manifest_path.exists() {
        bail!("manifest {:?} already exists", manifest_path.display());
    }

    let mut manifest = Manifest::default();
    manifest.profiles.insert(
        opts.profile_name.clone(),
        Profile {
            description: match opts.description {
                Some(description) => description,
                None => "<put one sentence description here>".into(),
            },
            links: vec![Link::new(
                format!("config/{}/<put source here>", opts.profile_name),
                format!("~/.config/{}/<put target here>", opts.profile_name),
                ActionKind::Symlink,
            )],
        },
    );

    fs::write(manifest_path, manifest.to_string())
        .with_context(|| format!("failed to write manifest {:?}", manifest_path.display()))?;
    info!("wrote manifest {:?}", manifest_path.display());

    Ok(())
}

fn run_deploy(manifest_path: &Path, opts: DeployOptions) -> Result<()> {
    let ctx = Context::load(manifest_path)?;
    let profile_names = if opts.all {
        ctx.manifest.profiles.keys().cloned().collect()
    } else {
        opts.profile_names
    };

    if profile_names.is_empty() {
        bail!("no profile given, name at least one or pass --all");
    }

    for profile_name in profile_names {
        let mappings = ctx.manifest.mappings(&profile_name, &ctx.root, &ctx.home)?;
        let plan = ctx.deployer.plan(&profile_name, mappings)?;

        if opts.dry_run {
            print!("{plan}");
            continue;
        }

        if plan.is_noop() {
            info!("profile {profile_name:?} already deployed, nothing to do");
            continue;
        }

        let bar = progress_bar(plan.pending().count() as u64)?;
        let result = ctx.deployer.apply_with_progress(&plan, &bar);
        bar.finish_and_clear();

        let mut state = match result {
            Ok(state) => state,
            Err(mut partial) => {
                if !partial.state.is_empty() {
                    let record = ctx.store.save(&mut partial.state)?;
                    warn!(
                        "partial deployment recorded at {:?}, undo it with `dotlink rollback {profile_name}`",
                        record.display()
                    );
                }
                return Err(partial.into());
            }
        };

        ctx.store.save(&mut state)?;

        let report = ctx.deployer.status(&state)?;
        if !report.is_clean() {
            for entry in report.drifted() {
                warn!("{:?} {}", entry.target.display(), entry.drift);
            }
            bail!("validation of profile {profile_name:?} failed after deployment");
        }
        info!(
            "deployed profile {profile_name:?} as run {} with {} action(s)",
            state.id,
            state.actions.len()
        );
    }

    Ok(())
}

fn run_rollback(manifest_path: &Path, opts: RollbackOptions) -> Result<()> {
    let ctx = Context::load_or_default(manifest_path)?;
    let state = ctx.latest_or(&opts.profile_name, opts.id)?;

    if opts.dry_run {
        println!("profile {} (run {}) would be undone as:", state.profile, state.id);
        for action in state.actions.iter().rev() {
            match &action.backup_path {
                Some(backup) => println!(
                    "  restore {} from {}",
                    action.target_path.display(),
                    backup.display()
                ),
                None => println!("  remove  {}", action.target_path.display()),
            }
        }
        return Ok(());
    }

    if !opts.yes {
        let confirmed = Confirm::new(&format!(
            "Roll back profile {:?} run {} ({} action(s))?",
            state.profile,
            state.id,
            state.actions.len()
        ))
        .with_default(false)
        .prompt()?;

        if !confirmed {
            info!("rollback cancelled");
            return Ok(());
        }
    }

    let report = match ctx.deployer.rollback(&state) {
        Ok(report) => report,
        Err(partial) => {
            // INVARIANT: Record only lists actions that are still deployed.
            let record = ctx.store.update(&partial.remaining)?;
            warn!(
                "{} action(s) left at {:?}, retry with `dotlink rollback {} --id {}`",
                partial.remaining.actions.len(),
                record.display(),
                state.profile,
                state.id
            );
            return Err(partial.into());
        }
    };
    ctx.store.remove(&state.profile, &state.id)?;
    report.into_result()?;

    Ok(())
}

fn run_status(manifest_path: &Path, opts: StatusOptions) -> Result<()> {
    let ctx = Context::load_or_default(manifest_path)?;
    let profile_names = if opts.profile_names.is_empty() {
        let mut known = ctx.manifest.profiles.keys().cloned().collect::<BTreeSet<_>>();
        known.extend(ctx.store.profiles()?);
        known.into_iter().collect()
    } else {
        opts.profile_names
    };

    for profile_name in profile_names {
        match ctx.store.latest(&profile_name)? {
            Some(state) => {
                let report = ctx.deployer.status(&state)?;
                print!("{report}");
                if report.is_clean() {
                    println!("  no drift");
                }
            }
            None => println!("profile {profile_name}: not deployed"),
        }
    }

    Ok(())
}

fn run_history(manifest_path: &Path, opts: HistoryOptions) -> Result<()> {
    let ctx = Context::load_or_default(manifest_path)?;
    let history = ctx.store.history(&opts.profile_name)?;
    if history.is_empty() {
        println!("profile {}: no recorded deployments", opts.profile_name);
        return Ok(());
    }

    for state in history {
        println!(
            "{:<20} {}  {} action(s), {} backup(s)",
            state.id,
            state.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            state.actions.len(),
            state.backups().count()
        );
    }

    Ok(())
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");

    let bar = ProgressBar::new(len);
    bar.set_style(style);

    Ok(bar)
}
