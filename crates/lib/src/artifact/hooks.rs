//! Pre- and post-build shell hooks.
//!
//! Hooks run through `/bin/sh -c` with the artifact's source directory as
//! working directory. The timeout is injectable so callers can bound
//! worst-case runtime; the default is no timeout.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors raised by a build hook.
#[derive(Debug, Error)]
pub enum HookError {
  /// The shell could not be started.
  #[error("failed to spawn shell: {0}")]
  Spawn(#[source] std::io::Error),

  /// The hook ran but exited unsuccessfully.
  #[error("hook exited with {code:?}: {stderr}")]
  Failed { code: Option<i32>, stderr: String },

  /// The hook exceeded the configured timeout.
  #[error("hook timed out after {timeout:?}")]
  TimedOut { timeout: Duration },
}

/// Run a shell hook to completion.
pub async fn run_hook(cmd: &str, cwd: &Path, timeout: Option<Duration>) -> Result<(), HookError> {
  debug!(cmd = %cmd, cwd = %cwd.display(), "running hook");

  let mut command = Command::new("/bin/sh");
  command.arg("-c").arg(cmd).current_dir(cwd);

  let output = match timeout {
    Some(limit) => tokio::time::timeout(limit, command.output())
      .await
      .map_err(|_| HookError::TimedOut { timeout: limit })?,
    None => command.output().await,
  }
  .map_err(HookError::Spawn)?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    return Err(HookError::Failed {
      code: output.status.code(),
      stderr,
    });
  }

  Ok(())
}
