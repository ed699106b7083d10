// ============================================
// setup.rs — Format, install, dismount, reboot
// ============================================
//
// The final stretch of a deployment. Order matters and nothing here
// stops early: if Setup fails the image is still dismounted and the
// machine still reboots, so an unattended run never hangs at a console.
//
//   1. Quick-format the target volume by drive letter (label kept)
//   2. setup.exe /noreboot /unattend:<answer file>   (blocks)
//   3. Dismount the ISO
//   4. Reboot
// ============================================

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};

use crate::{iso, shell};

/// Everything the install step needs, resolved earlier in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub iso_path: PathBuf,
    pub drive: PathBuf,
    pub answer_file: PathBuf,
    pub volume_label: String,
    /// Letter of the resolved volume; other volumes with the same label
    /// are never touched
    pub target_letter: Option<char>,
}

impl InstallPlan {
    /// setup.exe on the mounted media.
    pub fn setup_exe(&self) -> PathBuf {
        self.drive.join("sources").join("setup.exe")
    }
}

/// What happened during the install step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub setup_succeeded: bool,
}

/// OS actions used by the install step.
pub trait Installer {
    fn format_volume(&self, drive_letter: char, label: &str) -> Result<()>;
    fn run_setup(&self, setup_exe: &Path, answer_file: &Path) -> Result<()>;
    fn dismount(&self, iso_path: &Path) -> Result<()>;
    fn reboot(&self) -> Result<()>;
}

/// Run the install sequence. Only a failed reboot is returned as an error;
/// every earlier failure is logged and the sequence carries on.
pub fn install(installer: &dyn Installer, plan: &InstallPlan) -> Result<InstallOutcome> {
    match plan.target_letter {
        Some(letter) => {
            info!("[Setup] Formatting {}: ('{}')...", letter, plan.volume_label);
            if let Err(e) = installer.format_volume(letter, &plan.volume_label) {
                warn!("[Setup] Format failed, continuing: {:#}", e);
            }
        }
        None => warn!("[Setup] Volume '{}' has no drive letter, skipping format", plan.volume_label),
    }

    info!("[Setup] Launching Windows Setup...");
    info!("[Setup]   setup.exe: {}", plan.setup_exe().display());
    info!("[Setup]   unattend: {}", plan.answer_file.display());
    let setup_succeeded = match installer.run_setup(&plan.setup_exe(), &plan.answer_file) {
        Ok(()) => {
            info!("[Setup] setup.exe completed successfully");
            true
        }
        Err(e) => {
            error!("[Setup] {:#}", e);
            false
        }
    };

    if let Err(e) = installer.dismount(&plan.iso_path) {
        warn!("[Setup] {:#}", e);
    }

    info!("[Setup] Rebooting...");
    installer.reboot()?;

    Ok(InstallOutcome { setup_succeeded })
}

// ============================================
// WINDOWS IMPLEMENTATION
// ============================================

/// The real thing: PowerShell, setup.exe and shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsInstaller;

impl Installer for WindowsInstaller {
    fn format_volume(&self, drive_letter: char, label: &str) -> Result<()> {
        let script = format!(
            "Format-Volume -DriveLetter {} -NewFileSystemLabel {} -Confirm:$false | Out-Null",
            drive_letter,
            shell::ps_quote(label)
        );
        shell::powershell(&script).context("Format-Volume failed")?;
        Ok(())
    }

    fn run_setup(&self, setup_exe: &Path, answer_file: &Path) -> Result<()> {
        let status = shell::wait(
            setup_exe.as_os_str(),
            ["/noreboot".to_string(), format!("/unattend:{}", answer_file.display())],
        )?;

        if !status.success() {
            // 0x80004005 usually means Setup was cancelled
            bail!("Windows Setup exited with code: 0x{:X}", status.code().unwrap_or(-1));
        }
        Ok(())
    }

    fn dismount(&self, iso_path: &Path) -> Result<()> {
        iso::dismount_iso(&iso::PowerShellMounter, iso_path)
    }

    fn reboot(&self) -> Result<()> {
        match shell::run("shutdown", ["/r", "/t", "0"]) {
            Ok(_) => Ok(()),
            Err(e) => {
                // shutdown.exe isn't present in every WinPE image
                warn!("[Setup] shutdown failed ({:#}), trying wpeutil...", e);
                shell::run("wpeutil", ["reboot"]).context("Failed to reboot")?;
                Ok(())
            }
        }
    }
}

// ============================================
// TESTS
// ============================================
