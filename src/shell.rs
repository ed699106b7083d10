// ============================================
// shell.rs — External command helpers
// ============================================
//
// Every OS collaborator (PowerShell, DISM, setup.exe, shutdown) is run
// through the helpers here so command lines get logged the same way
// and failures carry the tool's own stderr.
// ============================================

use anyhow::{bail, Context, Result};
use log::debug;
use std::ffi::OsStr;
use std::process::{Command, ExitStatus, Output};

/// Full path to Windows PowerShell. Falls back to plain "powershell"
/// (resolved through PATH) when the system32 copy is missing, e.g. in WinPE
/// builds where PowerShell was added as an optional component.
fn powershell_exe() -> String {
    let system_root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
    let full = format!(r"{}\System32\WindowsPowerShell\v1.0\powershell.exe", system_root);
    if std::path::Path::new(&full).exists() {
        full
    } else {
        "powershell".to_string()
    }
}

/// Run a PowerShell script and return its stdout.
/// Fails if PowerShell can't be started or exits non-zero.
pub fn powershell(script: &str) -> Result<String> {
    debug!("[Shell] powershell: {}", script);

    let output = Command::new(powershell_exe())
        .args(["-NoProfile", "-NonInteractive", "-Command", script])
        .output()
        .context("Failed to run PowerShell")?;

    checked_stdout("PowerShell", output)
}

/// Run an executable with arguments and return its stdout.
pub fn run<I, S>(program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    debug!(
        "[Shell] {} {}",
        program,
        args.iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new(program)
        .args(&args)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;

    checked_stdout(program, output)
}

/// Spawn a program and block until it exits. Stdout/stderr are inherited so
/// long-running tools (setup.exe) show their own progress.
pub fn wait<I, S>(program: &OsStr, args: I) -> Result<ExitStatus>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .spawn()
        .with_context(|| format!("Failed to launch {}", program.to_string_lossy()))?;

    debug!("[Shell] {} started (PID: {})", program.to_string_lossy(), child.id());

    child
        .wait()
        .with_context(|| format!("Failed to wait for {}", program.to_string_lossy()))
}

fn checked_stdout(tool: &str, output: Output) -> Result<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} failed (exit code {}): {}{}",
            tool,
            output.status.code().unwrap_or(-1),
            stdout.trim(),
            stderr.trim()
        );
    }
    Ok(stdout)
}

/// Quote a value for use inside a single-quoted PowerShell string.
/// PowerShell escapes a single quote by doubling it.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
