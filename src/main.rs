// ============================================
// DeployIT - main.rs
// ============================================
// Unattended Windows deployment from the command line.
//
// The program flow is one straight line, every step runs once:
// 1. Parse arguments, load config/config.toml
// 2. Find the ISO (path given directly, or searched by release words)
// 3. Mount it
// 4. Pick the edition (argument, single edition, or prompt)
// 5. Resolve the target partition from its volume label
// 6. Fill in the answer file template
// 7. Format the volume, run setup.exe, dismount, reboot
// ============================================

use anyhow::{bail, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};

mod cli;
mod config;
mod editions;
mod iso;
mod partition;
mod prompt;
mod setup;
mod shell;
mod unattend;

use cli::Args;
use config::DeployConfig;
use iso::{ImageMounter, PowerShellMounter};
use partition::{PowerShellTopology, ResolvedTarget, TopologySource};
use prompt::{Chooser, TerminalChooser};
use setup::{InstallPlan, Installer, WindowsInstaller};
use unattend::Substitutions;

// ============================================
// MAIN FUNCTION
// ============================================

fn main() {
    let args = Args::from_env();
    init_logger(args.verbose);

    info!("============================================");
    info!("DeployIT v{}", env!("CARGO_PKG_VERSION"));
    info!("============================================");

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Logger with time + level prefix. RUST_LOG overrides the default level.
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            use std::io::Write;
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {level_style}{:<5}{level_style:#}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

// ============================================
// PIPELINE
// ============================================

/// OS-facing collaborators the pipeline drives.
struct Host<'a> {
    mounter: &'a dyn ImageMounter,
    topology: &'a dyn TopologySource,
    chooser: &'a dyn Chooser,
    installer: &'a dyn Installer,
    /// Where the generated answer file is written
    scratch_dir: PathBuf,
}

fn run(args: &Args) -> Result<()> {
    let app_dir = config::get_app_directory();
    info!("App directory: {}", app_dir.display());
    if config::is_winpe() {
        info!("Running in WinPE environment");
    } else {
        info!("Running in Live Windows environment");
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| app_dir.join(config::CONFIG_FILE));
    let config = DeployConfig::load(&config_path)?;

    let host = Host {
        mounter: &PowerShellMounter,
        topology: &PowerShellTopology,
        chooser: &TerminalChooser,
        installer: &WindowsInstaller,
        scratch_dir: std::env::temp_dir(),
    };
    deploy(args, &config, &app_dir, &host)
}

fn deploy(args: &Args, config: &DeployConfig, app_dir: &Path, host: &Host) -> Result<()> {
    if let Some(disk) = &args.disk {
        warn!("--disk:{} ignored, the disk is taken from the partition label", disk);
    }

    let template = answer_file_template(args, config, app_dir)?;
    let iso_path = locate_iso(args, config, host.chooser)?;

    let letter = iso::mount_iso(host.mounter, &iso_path)?;
    let drive = iso::drive_root(letter);

    // From here on the image is mounted; don't leave it behind on failure
    let (answer_file, target) = match prepare_mounted(args, &drive, &template, host) {
        Ok(prepared) => prepared,
        Err(e) => {
            if let Err(dismount_err) = iso::dismount_iso(host.mounter, &iso_path) {
                warn!("{:#}", dismount_err);
            }
            return Err(e);
        }
    };

    if args.dry_run {
        info!("Dry run: answer file ready at {}, skipping install", answer_file.display());
        iso::dismount_iso(host.mounter, &iso_path)?;
        return Ok(());
    }

    let plan = InstallPlan {
        iso_path,
        drive,
        answer_file,
        volume_label: args.partition.clone(),
        target_letter: target.drive_letter,
    };
    let outcome = setup::install(host.installer, &plan)?;
    if !outcome.setup_succeeded {
        warn!("Windows Setup did not complete successfully; rebooting anyway");
    }
    Ok(())
}

/// Custom template from --unattended, or the configured default.
fn answer_file_template(args: &Args, config: &DeployConfig, app_dir: &Path) -> Result<PathBuf> {
    match &args.unattended {
        Some(custom) => {
            if !custom.is_file() {
                bail!(
                    "Unattended file {} is unreachable, check path and ensure file is present",
                    custom.display()
                );
            }
            Ok(custom.clone())
        }
        None => {
            let default = config.unattended_template(app_dir);
            if !default.is_file() {
                bail!(
                    "Unattended file {} is missing, please check config file.",
                    default.display()
                );
            }
            Ok(default)
        }
    }
}

/// --iso-path as a file, or the one library ISO matching its words.
fn locate_iso(args: &Args, config: &DeployConfig, chooser: &dyn Chooser) -> Result<PathBuf> {
    let direct = Path::new(&args.iso_path);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    let matches = iso::find_isos(config.iso_root()?, &args.release_descriptor());
    let picked = iso::pick_iso(matches, chooser)?;
    info!("Using ISO: {}", picked.display());
    Ok(picked)
}

/// Steps that need the mounted image: edition, target partition, answer file.
fn prepare_mounted(args: &Args, drive: &Path, template: &Path, host: &Host) -> Result<(PathBuf, ResolvedTarget)> {
    let edition = match &args.edition {
        Some(edition) => edition.clone(),
        None => {
            let image = iso::find_install_image(drive)?;
            let catalog = editions::list_editions(&image)?;
            editions::choose_edition(&catalog, host.chooser)?
        }
    };

    let target = partition::resolve_partition(host.topology, &args.partition)?;
    let (partition_id, disk_id) = target.ids();

    let subs = Substitutions {
        disk_id,
        partition_id,
        edition,
        hostname: args.hostname.clone().unwrap_or_else(local_hostname),
    };
    let answer_file = unattend::render(template, &subs, &host.scratch_dir)?;
    Ok((answer_file, target))
}

/// This machine's computer name, used when --hostname isn't given.
fn local_hostname() -> String {
    for var in ["COMPUTERNAME", "HOSTNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }
    match shell::run("hostname", std::iter::empty::<&str>()) {
        Ok(out) => out.trim().to_string(),
        Err(e) => {
            warn!("Could not determine hostname: {:#}", e);
            String::new()
        }
    }
}

// ============================================
// TESTS
// ============================================
