//! Running the external inspection and patching tools.

use std::ffi::OsStr;
use std::process::Command;

/// Why a tool invocation failed.
#[derive(Debug)]
pub(crate) enum ToolError {
    /// The program is not on `PATH`.
    Missing,
    /// The program exists but could not be spawned.
    Spawn(std::io::Error),
    /// The program ran and exited non-zero.
    Failed { stdout: String, stderr: String },
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "not found on PATH"),
            Self::Spawn(e) => write!(f, "could not be started: {e}"),
            Self::Failed { stdout, stderr } => {
                let msg = if stderr.trim().is_empty() { stdout } else { stderr };
                write!(f, "{}", msg.trim())
            }
        }
    }
}

/// Run `program` with `args` and return its stdout.
pub(crate) fn run<I, S>(program: &str, args: I) -> Result<String, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let exe = which::which(program).map_err(|_| ToolError::Missing)?;

    let output = Command::new(exe)
        .args(args)
        .output()
        .map_err(ToolError::Spawn)?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        return Err(ToolError::Failed {
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(stdout)
}
