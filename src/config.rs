// ============================================
// config.rs — Settings file next to the EXE
// ============================================
//
// DeployIT is portable: it runs from a USB stick or network share with
// its settings alongside it.
//
//   DeployIT/
//   ├── deployit.exe
//   └── config/
//       ├── config.toml        # this file
//       └── unattended.xml     # default answer file template
//
// config.toml:
//   ISO_path = '\\fileserver\iso'
//   default_unattended = 'config\unattended.xml'
//
// Older plain key=value files (unquoted values, one per line) are still
// read when the content isn't valid TOML:
//   ISO_path=\\fileserver\iso
// ============================================

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Location of the config file relative to the app directory.
pub const CONFIG_FILE: &str = "config/config.toml";

/// Settings loaded from config.toml.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeployConfig {
    /// Root of the ISO library searched when --iso-path isn't a file
    #[serde(rename = "ISO_path", default)]
    pub iso_path: Option<PathBuf>,
    /// Answer file template, relative to the app directory
    #[serde(default = "default_unattended")]
    pub default_unattended: PathBuf,
}

fn default_unattended() -> PathBuf {
    PathBuf::from("config").join("unattended.xml")
}

impl DeployConfig {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("Config file not found at {}, aborting.", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse TOML, falling back to plain `key=value` lines.
    pub fn parse(content: &str) -> Result<Self> {
        match toml::from_str(content) {
            Ok(config) => Ok(config),
            Err(toml_err) => {
                debug!("[Config] Not TOML ({}), reading as key=value lines", toml_err.message());
                Self::parse_lines(content)
            }
        }
    }

    fn parse_lines(content: &str) -> Result<Self> {
        let mut config = DeployConfig {
            iso_path: None,
            default_unattended: default_unattended(),
        };

        for (number, line) in content.lines().enumerate() {
            let line = line.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("Line {}: expected key=value, got '{}'", number + 1, line);
            };
            let value = unquote(value.trim());

            match key.trim() {
                "ISO_path" => config.iso_path = Some(PathBuf::from(value)),
                "default_unattended" => config.default_unattended = PathBuf::from(value),
                other => warn!("[Config] Unknown key '{}' ignored", other),
            }
        }
        Ok(config)
    }

    /// Default answer file template, resolved against the app directory.
    pub fn unattended_template(&self, app_dir: &Path) -> PathBuf {
        app_dir.join(&self.default_unattended)
    }

    /// ISO library root, required when the user gave a release name.
    pub fn iso_root(&self) -> Result<&Path> {
        match &self.iso_path {
            Some(p) => Ok(p.as_path()),
            None => bail!("ISO_path is not set in the config file"),
        }
    }
}

/// Strip one pair of matching surrounding quotes.
fn unquote(value: &str) -> &str {
    for q in ['\'', '"'] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner;
        }
    }
    value
}

/// Directory containing the running EXE (config lives beside it).
pub fn get_app_directory() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        let resolved = exe_path.canonicalize().unwrap_or(exe_path);
        if let Some(parent) = resolved.parent() {
            // Strip \\?\ prefix that canonicalize adds on Windows
            let parent_str = parent.to_string_lossy();
            if let Some(stripped) = parent_str.strip_prefix(r"\\?\") {
                return PathBuf::from(stripped);
            }
            return parent.to_path_buf();
        }
    }
    warn!("Could not determine EXE directory, using current directory");
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// True when running inside WinPE (system drive is the X: RAM disk).
pub fn is_winpe() -> bool {
    if std::env::var("SystemDrive")
        .map(|v| v.eq_ignore_ascii_case("X:"))
        .unwrap_or(false)
    {
        return true;
    }
    Path::new(r"X:\Windows\System32\startnet.cmd").exists()
}
