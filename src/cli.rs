// ============================================
// cli.rs — Command line arguments
// ============================================
//
// Deployment scripts call DeployIT with colon-style arguments:
//
//   deployit --iso-path:"server 2016" --partition:OS --hostname:LAB-07
//
// clap doesn't know the colon form, so "--key:value" is rewritten to
// "--key=value" before parsing. An empty value ("--edition:") means the
// argument wasn't given at all. "--disk:<n>" from older scripts is
// accepted and ignored.
// ============================================

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "deployit")]
#[command(version)]
#[command(about = "Unattended Windows deployment onto a labelled partition")]
#[command(arg_required_else_help = true)]
#[command(after_help = "Arguments may also be written as --key:value, e.g. --partition:OS")]
pub struct Args {
    /// ISO file, or words matched against the ISO library (e.g. "server 2016 x64")
    #[arg(long = "iso-path", value_name = "PATH|RELEASE")]
    pub iso_path: String,

    /// Volume label of the partition to install onto
    #[arg(long, value_name = "LABEL")]
    pub partition: String,

    /// Architecture word added to the ISO search (e.g. x64)
    #[arg(long)]
    pub arch: Option<String>,

    /// Edition to install; prompts when omitted and the image has several
    #[arg(long)]
    pub edition: Option<String>,

    /// Computer name for the new installation (default: this machine's name)
    #[arg(long)]
    pub hostname: Option<String>,

    /// Custom answer file template instead of the configured default
    #[arg(long, value_name = "PATH")]
    pub unattended: Option<PathBuf>,

    /// Config file (default: config/config.toml next to the EXE)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Accepted for old deployment scripts; the disk comes from --partition
    #[arg(long, hide = true)]
    pub disk: Option<String>,

    /// Prepare everything and write the answer file, but don't format or install
    #[arg(long)]
    pub dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the process arguments (exits with usage on error or --help).
    pub fn from_env() -> Self {
        Args::parse_from(normalize_args(std::env::args_os()))
    }

    /// Release words used for the ISO search: --iso-path plus --arch.
    pub fn release_descriptor(&self) -> String {
        match &self.arch {
            Some(arch) => format!("{} {}", self.iso_path, arch),
            None => self.iso_path.clone(),
        }
    }
}

/// Rewrite "--key:value" to "--key=value" and drop "--key:" with no value.
/// Everything else is passed through untouched.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .filter_map(|arg| {
            let Some(s) = arg.to_str() else {
                return Some(arg);
            };
            let Some(body) = s.strip_prefix("--") else {
                return Some(arg);
            };

            let colon = body.find(':');
            let equals = body.find('=');
            match (colon, equals) {
                (Some(c), eq) if eq.map_or(true, |e| c < e) => {
                    let (key, value) = (&body[..c], &body[c + 1..]);
                    if value.is_empty() {
                        None
                    } else {
                        Some(OsString::from(format!("--{}={}", key, value)))
                    }
                }
                _ => Some(arg),
            }
        })
        .collect()
}
