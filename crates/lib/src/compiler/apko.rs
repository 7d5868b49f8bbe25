//! Image assembly via the apko CLI.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{CompilerError, ImageCompiler, LayerSpec, run_checked};

/// Name of the layer tarball apko writes into the work directory.
const LAYER_FILE: &str = "layer.tar.gz";

/// Invokes `apko build` for the layer step and places the finished tarball
/// at the image's output path.
#[derive(Debug, Clone)]
pub struct ApkoCli {
  program: PathBuf,
}

impl ApkoCli {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }
}

impl Default for ApkoCli {
  fn default() -> Self {
    Self::new("apko")
  }
}

/// Assemble the argument vector for one `apko build` invocation.
fn layer_args(spec: &LayerSpec) -> Vec<OsString> {
  let mut args: Vec<OsString> = vec![
    "build".into(),
    spec.config.clone().into(),
    spec.reference.clone().into(),
    spec.work_dir.join(LAYER_FILE).into(),
  ];

  for repo in &spec.extra_repositories {
    args.push("--repository-append".into());
    args.push(repo.clone().into());
  }

  for key in &spec.extra_keys {
    args.push("--keyring-append".into());
    args.push(key.clone().into());
  }

  args
}

#[async_trait]
impl ImageCompiler for ApkoCli {
  async fn build_layer(&self, spec: &LayerSpec) -> Result<PathBuf, CompilerError> {
    info!(
      config = %spec.config.display(),
      reference = %spec.reference,
      "building image layer"
    );
    run_checked(&self.program, &layer_args(spec)).await?;
    Ok(spec.work_dir.join(LAYER_FILE))
  }

  async fn package_image(&self, reference: &str, layer: &Path, output: &Path) -> Result<(), CompilerError> {
    info!(reference = %reference, output = %output.display(), "packaging image");

    if let Some(parent) = output.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(layer, output).await?;
    Ok(())
  }
}
