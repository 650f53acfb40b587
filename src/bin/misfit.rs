// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use misfit::{
    backup::restore::restore,
    build::{Builder, BuildRequest, PayloadFile, SourceSearch},
    config::{Manifest, Preset},
    install::{InstallOptions, Installer},
    path::{default_backups_root, exe_dir, locate_manifest, ManifestLocation},
    progress::{LogLevel, LogLine, ProgressLog},
    prompt::{AssumeYes, Confirm, IndicatifPrompter},
};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{env, path::PathBuf, process::exit, time::Duration};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  misfit [options] [<misfit-command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Force studio mode.
    #[arg(long, global = true, conflicts_with = "installer")]
    pub studio: bool,

    /// Force installer mode.
    #[arg(long, global = true)]
    pub installer: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let mode = Mode::detect(self.studio, self.installer);
        match self.command {
            Some(Command::Install(opts)) => run_install(opts).await,
            Some(Command::Restore(opts)) => run_restore(opts),
            Some(Command::Validate(opts)) => run_validate(opts),
            Some(Command::Inspect(opts)) => run_inspect(opts),
            Some(Command::Build(opts)) => run_build(opts).await,
            Some(Command::Preset(opts)) => run_preset(opts),
            None if mode == Mode::Installer => run_install(InstallCliOptions::default()).await,
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install bundled or given manifest.
    #[command(override_usage = "misfit install [options]")]
    Install(InstallCliOptions),

    /// Restore latest backup of an application.
    #[command(override_usage = "misfit restore [options] [<app_name>]")]
    Restore(RestoreOptions),

    /// Validate manifest without touching anything.
    #[command(override_usage = "misfit validate [options] <manifest>")]
    Validate(ValidateOptions),

    /// Show what a build would overwrite.
    #[command(override_usage = "misfit inspect [options] <project_name>")]
    Inspect(InspectOptions),

    /// Build distributable bundle.
    #[command(override_usage = "misfit build [options] <project_name>")]
    Build(BuildOptions),

    /// Convert between manifests and presets.
    #[command(subcommand)]
    Preset(PresetCommand),
}

#[derive(Parser, Clone, Debug, Default)]
#[command(author, about, long_about)]
struct InstallCliOptions {
    /// Path to manifest instead of the bundled one.
    #[arg(short, long, value_name = "path")]
    pub manifest: Option<PathBuf>,

    /// Answer yes to every confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RestoreOptions {
    /// Application to restore. Without it only legacy backups are searched.
    #[arg(value_name = "app_name")]
    pub app_name: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ValidateOptions {
    /// Path to manifest.
    #[arg(required = true, value_name = "manifest")]
    pub manifest: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InspectOptions {
    /// Name of project, or absolute output path in advanced mode.
    #[arg(required = true, value_name = "project_name")]
    pub project_name: String,

    /// Path to manifest.
    #[arg(short, long, required = true, value_name = "path")]
    pub manifest: PathBuf,

    /// Base directory of build output.
    #[arg(short, long, value_name = "path")]
    pub dist: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BuildOptions {
    /// Name of project, or absolute output path in advanced mode.
    #[arg(required = true, value_name = "project_name")]
    pub project_name: String,

    /// Path to manifest.
    #[arg(short, long, required = true, value_name = "path")]
    pub manifest: PathBuf,

    /// Payload to stage, as SOURCE=STAGED.
    #[arg(short, long = "payload", value_name = "source=staged")]
    pub payloads: Vec<PayloadFile>,

    /// Base directory of build output.
    #[arg(short, long, value_name = "path")]
    pub dist: Option<PathBuf>,

    /// Overwrite existing output without asking.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum PresetCommand {
    /// Export manifest as named preset.
    #[command(override_usage = "misfit preset export [options] <manifest> <preset>")]
    Export(PresetExportOptions),

    /// Import preset as manifest.
    #[command(override_usage = "misfit preset import [options] <preset> <manifest>")]
    Import(PresetImportOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PresetExportOptions {
    #[arg(required = true, value_name = "manifest")]
    pub manifest: PathBuf,

    #[arg(required = true, value_name = "preset")]
    pub preset: PathBuf,

    /// Name of preset, defaults to application name.
    #[arg(short, long, value_name = "name")]
    pub name: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PresetImportOptions {
    #[arg(required = true, value_name = "preset")]
    pub preset: PathBuf,

    #[arg(required = true, value_name = "manifest")]
    pub manifest: PathBuf,
}

/// Which face the executable shows when no command is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Studio,
    Installer,
}

impl Mode {
    fn detect(studio: bool, installer: bool) -> Self {
        if studio {
            return Self::Studio;
        }
        if installer {
            return Self::Installer;
        }

        match env::var("MISFIT_MODE").map(|mode| mode.trim().to_ascii_lowercase()) {
            Ok(mode) if mode == "studio" => return Self::Studio,
            Ok(mode) if mode == "installer" => return Self::Installer,
            _ => {}
        }

        if env::var("MISFIT_STUDIO")
            .map(|flag| matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false)
        {
            return Self::Studio;
        }

        match exe_dir().and_then(|dir| locate_manifest(&dir)) {
            Some(_) => Self::Installer,
            None => Self::Studio,
        }
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{elapsed_precise:.green}  {spinner:.yellow}  {msg}")?;
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(100));

    Ok(bar)
}

fn prompter(yes: bool, bar: &ProgressBar) -> Box<dyn Confirm + Send> {
    if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(IndicatifPrompter::new(bar.clone()))
    }
}

async fn drain_log(mut receiver: UnboundedReceiver<LogLine>, bar: ProgressBar) {
    while let Some(line) = receiver.recv().await {
        if line.level == LogLevel::Info {
            bar.set_message(line.message.clone());
        }
        bar.println(line.to_string());
    }
    bar.finish_and_clear();
}

fn find_manifest(explicit: Option<PathBuf>) -> Result<ManifestLocation> {
    if let Some(path) = explicit {
        return Ok(ManifestLocation::from_manifest_path(path));
    }

    let mut bases = Vec::new();
    if let Some(dir) = exe_dir() {
        bases.push(dir);
    }
    bases.push(env::current_dir()?);

    bases
        .iter()
        .find_map(|base| locate_manifest(base))
        .ok_or_else(|| anyhow!("no install manifest found next to executable or in current directory"))
}

async fn run_install(opts: InstallCliOptions) -> Result<()> {
    let location = find_manifest(opts.manifest)?;
    info!("using manifest {:?}", location.manifest.display());
    let manifest = Manifest::load(&location.manifest)?;
    let options = InstallOptions {
        install_root: location.install_root(),
        payload_root: manifest.payload_root(&location.bundle_root)?,
        command_dir: env::current_dir()?,
        backups_root: default_backups_root()?,
    };

    let bar = progress_bar()?;
    let confirm = prompter(opts.yes, &bar);
    let (log, receiver) = ProgressLog::channel();
    let drain = tokio::spawn(drain_log(receiver, bar));

    let report = tokio::task::spawn_blocking(move || {
        Installer::new(&manifest, options, confirm, log).run()
    })
    .await?;
    drain.await?;

    let report = report?;
    info!(
        "ran {} steps, skipped {}",
        report.steps_run, report.steps_skipped
    );
    if let Some(record) = report.backup {
        info!("{} originals backed up", record.entries.len());
    }

    Ok(())
}

fn run_restore(opts: RestoreOptions) -> Result<()> {
    if opts.app_name.is_none() {
        warn!("no application name given, searching legacy backups only");
    }

    let report = restore(&default_backups_root()?, opts.app_name.as_deref())?;
    info!(
        "restored {} paths from {:?}",
        report.restored.len(),
        report.backup_dir.display()
    );

    Ok(())
}

fn run_validate(opts: ValidateOptions) -> Result<()> {
    let manifest = Manifest::load(&opts.manifest)?;
    manifest
        .validate()
        .with_context(|| format!("{:?} is invalid", opts.manifest.display()))?;
    let enabled = manifest.enabled_steps().count();
    info!(
        "{:?} is valid: {enabled} of {} steps enabled",
        opts.manifest.display(),
        manifest.steps.len()
    );

    Ok(())
}

fn run_inspect(opts: InspectOptions) -> Result<()> {
    let manifest = Manifest::load(&opts.manifest)?;
    let dist = match opts.dist {
        Some(dist) => dist,
        None => misfit::build::default_dist_base()?,
    };
    let builder = Builder::new(
        dist,
        env::current_exe()?,
        SourceSearch::from_env(),
        AssumeYes,
        ProgressLog::detached(),
    );
    let info = builder.inspect(&opts.project_name, manifest.advanced_mode)?;
    let clearance = info.clearance();

    println!(
        "{}",
        serde_json::json!({ "target": info, "clearance": clearance })
    );

    Ok(())
}

async fn run_build(opts: BuildOptions) -> Result<()> {
    let manifest = Manifest::load(&opts.manifest)?;
    let dist = match opts.dist {
        Some(dist) => dist,
        None => misfit::build::default_dist_base()?,
    };
    let request = BuildRequest {
        project_name: opts.project_name,
        manifest,
        payload_files: opts.payloads,
        force_overwrite: opts.force,
    };

    let bar = progress_bar()?;
    let confirm = prompter(false, &bar);
    let (log, receiver) = ProgressLog::channel();
    let drain = tokio::spawn(drain_log(receiver, bar));
    let exe = env::current_exe()?;

    let root = tokio::task::spawn_blocking(move || {
        Builder::new(dist, exe, SourceSearch::from_env(), confirm, log).build(&request)
    })
    .await?;
    drain.await?;

    info!("bundle ready at {:?}", root?.display());

    Ok(())
}

fn run_preset(opts: PresetCommand) -> Result<()> {
    match opts {
        PresetCommand::Export(opts) => {
            let manifest = Manifest::load(&opts.manifest)?;
            let name = opts.name.unwrap_or_else(|| manifest.app_name.clone());
            Preset::new(name, manifest).save(&opts.preset)?;
            info!("exported preset to {:?}", opts.preset.display());
        }
        PresetCommand::Import(opts) => {
            let preset = Preset::load(&opts.preset)?;
            preset.data.save(&opts.manifest)?;
            info!(
                "imported preset {:?} into {:?}",
                preset.name,
                opts.manifest.display()
            );
        }
    }

    Ok(())
}
