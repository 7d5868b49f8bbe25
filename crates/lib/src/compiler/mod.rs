//! External compiler contracts.
//!
//! The orchestrator never compiles anything itself. Packages, images, and
//! apk indexes are produced by external tools invoked through the traits in
//! this module, so the scheduler and the watch engine can be exercised with
//! recording fakes in tests.

pub mod apko;
pub mod melange;

#[cfg(test)]
pub mod testing;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub use apko::ApkoCli;
pub use melange::{MelangeCli, MelangeIndex};

/// Errors raised by external compiler invocations.
#[derive(Debug, Error)]
pub enum CompilerError {
  /// The compiler binary could not be started.
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The compiler ran but exited unsuccessfully.
  #[error("{program} exited with {code:?}: {stderr}")]
  Failed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  /// Filesystem work around an invocation failed.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// One package-compiler invocation: a single recipe for a single
/// architecture.
#[derive(Debug, Clone)]
pub struct PackageBuildSpec {
  /// Path to the package recipe.
  pub config: PathBuf,

  /// Directory compiled artifacts are written to.
  pub out_dir: PathBuf,

  /// Directory the recipe's sources are resolved against.
  pub source_dir: PathBuf,

  /// Target architecture for this invocation.
  pub arch: String,

  /// Key used to sign the produced packages.
  pub signing_key: Option<PathBuf>,

  /// Whether the compiler should regenerate the apk index itself. The
  /// scheduler regenerates indexes once per batch instead, so this is
  /// normally false.
  pub generate_index: bool,
}

/// One image-layer invocation.
#[derive(Debug, Clone)]
pub struct LayerSpec {
  /// Path to the image configuration.
  pub config: PathBuf,

  /// Scratch directory for this build; the layer lands here.
  pub work_dir: PathBuf,

  /// Reference (tag) for the produced image.
  pub reference: String,

  /// Additional package repositories to resolve contents from.
  pub extra_repositories: Vec<PathBuf>,

  /// Additional trusted keys for package verification.
  pub extra_keys: Vec<PathBuf>,
}

/// Compiles package recipes into apk artifacts.
#[async_trait]
pub trait PackageCompiler: Send + Sync {
  async fn compile(&self, spec: &PackageBuildSpec) -> Result<(), CompilerError>;
}

/// Assembles images from packages: first a filesystem layer, then the final
/// OCI tarball at its output location.
#[async_trait]
pub trait ImageCompiler: Send + Sync {
  /// Build the image's filesystem layer, returning its path inside
  /// `spec.work_dir`.
  async fn build_layer(&self, spec: &LayerSpec) -> Result<PathBuf, CompilerError>;

  /// Place the finished OCI tarball for `reference` at `output`.
  async fn package_image(&self, reference: &str, layer: &Path, output: &Path) -> Result<(), CompilerError>;
}

/// Regenerates the apk index for one architecture directory.
#[async_trait]
pub trait IndexGenerator: Send + Sync {
  async fn generate(&self, arch_dir: &Path, index: &Path, signing_key: Option<&Path>) -> Result<(), CompilerError>;
}

/// Run an external program and map a non-zero exit into `CompilerError`.
pub(crate) async fn run_checked(program: &Path, args: &[OsString]) -> Result<(), CompilerError> {
  debug!(program = %program.display(), ?args, "invoking compiler");

  let output = Command::new(program)
    .args(args)
    .output()
    .await
    .map_err(|source| CompilerError::Spawn {
      program: program.display().to_string(),
      source,
    })?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    return Err(CompilerError::Failed {
      program: program.display().to_string(),
      code: output.status.code(),
      stderr,
    });
  }

  Ok(())
}
