//! Deadline-bound subprocess execution.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::error::ProcessError;

/// Result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, -1 when the process was killed by a signal.
    pub code: i32,
    pub success: bool,
    /// stdout followed by stderr.
    pub output: String,
}

/// Run `program` with `args` in `dir` and wait for it until `deadline`.
///
/// The child is killed if the deadline passes first, and the expiry is
/// reported as [`ProcessError::Timeout`], never as a failed exit.
pub async fn run_command(
    program: &str,
    args: &[String],
    dir: &Path,
    envs: &[(String, String)],
    deadline: Instant,
) -> Result<CommandOutput, ProcessError> {
    debug!("Running {} {} in {}", program, args.join(" "), dir.display());

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(dir)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let secs = deadline
        .saturating_duration_since(Instant::now())
        .as_secs();

    let output = timeout_at(deadline, command.output())
        .await
        .map_err(|_| ProcessError::Timeout {
            program: program.to_string(),
            secs,
        })?
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandOutput {
        code: output.status.code().unwrap_or(-1),
        success: output.status.success(),
        output: combined,
    })
}
