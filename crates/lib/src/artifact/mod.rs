//! Buildable artifacts.
//!
//! A package or an image is an artifact: it has a source configuration file,
//! an output target, an exclusive build lock and a last-build timestamp. The
//! timestamp drives the incremental guard: a build is skipped when the
//! source's modification time is strictly before the last recorded attempt.

pub mod hooks;
mod image;
mod package;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::compiler::CompilerError;
use hooks::HookError;

pub use image::{Image, ImageOptions};
pub use package::{Package, PackageOptions};

/// What a `build()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
  /// The external compiler ran.
  Built,
  /// The source was unchanged since the last attempt; nothing ran.
  Fresh,
  /// Cancellation stopped the work before it started.
  Cancelled,
}

/// Errors raised while building an artifact.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The source configuration file could not be stat'ed.
  #[error("failed to stat {}: {source}", path.display())]
  Stat {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The pre-build hook failed; the build was aborted.
  #[error("pre-build hook failed: {0}")]
  PreBuild(#[source] HookError),

  /// The post-build hook failed.
  #[error("post-build hook failed: {0}")]
  PostBuild(#[source] HookError),

  /// Package compilation failed for one architecture.
  #[error("failed to build package for {arch}: {source}")]
  Compile {
    arch: String,
    #[source]
    source: CompilerError,
  },

  /// The image layer could not be built.
  #[error("failed to build layer: {0}")]
  Layer(#[source] CompilerError),

  /// The finished image could not be packaged.
  #[error("failed to package image: {0}")]
  Package(#[source] CompilerError),

  /// The scratch directory for an image build could not be created.
  #[error("failed to create work directory: {0}")]
  WorkDir(#[source] std::io::Error),

  /// Index regeneration between package and image builds failed.
  #[error("failed to regenerate index for {arch}: {source}")]
  Index {
    arch: String,
    #[source]
    source: CompilerError,
  },
}

/// The incremental guard: true when `source` was last modified strictly
/// before `last_build`, meaning the previous attempt already covered the
/// current source state.
pub(crate) fn source_is_fresh(source: &Path, last_build: Option<SystemTime>) -> Result<bool, BuildError> {
  let modified = std::fs::metadata(source)
    .and_then(|meta| meta.modified())
    .map_err(|source_err| BuildError::Stat {
      path: source.to_path_buf(),
      source: source_err,
    })?;

  Ok(matches!(last_build, Some(last) if modified < last))
}
