// ============================================
// iso.rs — Locating and mounting installation ISOs
// ============================================
//
// The user usually passes a loose release description instead of a path,
// e.g. "server 2012 r2" or "rs 14316 x64". We search the ISO library
// recursively and keep every ISO whose FULL path contains all the words,
// so folder names like "\Server\2012\" count too.
//
// Mounting uses the PowerShell storage cmdlets built into Windows 8+.
// ============================================

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::prompt::{self, Chooser};
use crate::shell;

// ============================================
// ISO SEARCH
// ============================================

/// Find every .iso under `root` whose path matches all words of `release`.
/// Matching is case-insensitive substring matching against the whole path.
///
/// # Arguments
/// * `root` — ISO library directory (searched recursively)
/// * `release` — whitespace separated words, e.g. "server 2016 x64"
///
/// # Returns
/// All matches in directory walk order (entries sorted by name). May be
/// empty or contain several paths; the caller decides what to do.
pub fn find_isos(root: &Path, release: &str) -> Vec<PathBuf> {
    info!("[ISO] Searching {} for '{}'...", root.display(), release);

    let tokens: Vec<String> = release.split_whitespace().map(str::to_lowercase).collect();
    let mut matches = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[ISO] Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_iso(entry.path()) {
            continue;
        }

        if path_matches(entry.path(), &tokens) {
            debug!("[ISO]   match: {}", entry.path().display());
            matches.push(entry.into_path());
        }
    }

    info!("[ISO] Found {} matching image(s)", matches.len());
    matches
}

/// Narrow the search result down to one ISO.
/// No match is fatal; several matches are offered to the user by file name.
pub fn pick_iso(mut matches: Vec<PathBuf>, chooser: &dyn Chooser) -> Result<PathBuf> {
    if matches.is_empty() {
        bail!("No such file/release, quitting");
    }
    if matches.len() > 1 {
        info!("[ISO] Not specific enough, please select Windows release");
    }

    let names: Vec<String> = matches
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect();

    let picked = prompt::select_one(chooser, "Select release", &names)?;
    Ok(matches.swap_remove(picked))
}

fn is_iso(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("iso"))
        .unwrap_or(false)
}

/// True when every (already lowercased) token occurs somewhere in the path.
fn path_matches(path: &Path, tokens: &[String]) -> bool {
    let haystack = path.to_string_lossy().to_lowercase();
    tokens.iter().all(|t| haystack.contains(t.as_str()))
}

// ============================================
// MOUNT / DISMOUNT
// ============================================

/// Attach/detach primitives for disk images.
pub trait ImageMounter {
    /// Mount the image and return the raw drive-letter output.
    fn attach(&self, iso_path: &Path) -> Result<String>;
    fn detach(&self, iso_path: &Path) -> Result<()>;
}

/// Mount-DiskImage / Dismount-DiskImage through PowerShell.
#[derive(Debug, Default, Clone, Copy)]
pub struct PowerShellMounter;

impl ImageMounter for PowerShellMounter {
    fn attach(&self, iso_path: &Path) -> Result<String> {
        let script = format!(
            "(Mount-DiskImage -ImagePath {} -PassThru | Get-Volume).DriveLetter",
            shell::ps_quote(&iso_path.display().to_string())
        );
        shell::powershell(&script).context("Failed to mount ISO")
    }

    fn detach(&self, iso_path: &Path) -> Result<()> {
        let script = format!(
            "Dismount-DiskImage -ImagePath {} | Out-Null",
            shell::ps_quote(&iso_path.display().to_string())
        );
        shell::powershell(&script).context("Failed to dismount ISO")?;
        Ok(())
    }
}

/// Mount an ISO and return the drive letter Windows assigned to it.
/// If no usable letter comes back the image is dismounted again.
pub fn mount_iso(mounter: &dyn ImageMounter, iso_path: &Path) -> Result<char> {
    info!("[ISO] Mounting {}...", iso_path.display());

    let stdout = mounter.attach(iso_path)?;
    match parse_drive_letter(&stdout) {
        Ok(letter) => {
            info!("[ISO] Mounted at {}:", letter);
            Ok(letter)
        }
        Err(e) => {
            if let Err(d) = mounter.detach(iso_path) {
                warn!("[ISO] Dismount after failed mount also failed: {:#}", d);
            }
            Err(e)
        }
    }
}

/// Dismount a previously mounted ISO (same path that was mounted).
pub fn dismount_iso(mounter: &dyn ImageMounter, iso_path: &Path) -> Result<()> {
    info!("[ISO] Dismounting {}...", iso_path.display());
    mounter.detach(iso_path)?;
    info!("[ISO] Dismounted");
    Ok(())
}

/// Pull the single drive letter out of the cmdlet output.
/// Output is normally "E\r\n" but may carry stray whitespace or a colon.
pub fn parse_drive_letter(output: &str) -> Result<char> {
    let cleaned: String = output
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control() && *c != ':')
        .collect();

    let mut chars = cleaned.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_ascii_alphabetic() => Ok(letter.to_ascii_uppercase()),
        (None, _) => bail!("ISO mounted but no drive letter assigned"),
        _ => bail!("Unexpected drive letter output from Mount-DiskImage: '{}'", output.trim()),
    }
}

/// Root of a mounted drive, e.g. "E:\".
pub fn drive_root(letter: char) -> PathBuf {
    PathBuf::from(format!("{}:\\", letter))
}

/// Find install.wim (or install.esd on ESD-based media) under \sources.
pub fn find_install_image(drive: &Path) -> Result<PathBuf> {
    let sources = drive.join("sources");
    for name in ["install.wim", "install.esd"] {
        let candidate = sources.join(name);
        if candidate.is_file() {
            info!("[ISO] Found {} at: {}", name, candidate.display());
            return Ok(candidate);
        }
    }
    bail!("No install.wim or install.esd found in {}", sources.display())
}

// ============================================
// TESTS
// ============================================
