//! Image artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::compiler::{ImageCompiler, LayerSpec};
use crate::config::{self, ConfigError, ImageConfig};

use super::hooks::run_hook;
use super::{BuildError, BuildOutcome, source_is_fresh};

/// Per-image settings beyond the configuration itself.
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
  /// Reference (tag) for the produced image. Defaults to
  /// `<config basename>:latest`.
  pub reference: Option<String>,
  pub extra_repositories: Vec<PathBuf>,
  pub extra_keys: Vec<PathBuf>,
  pub pre_build: Option<String>,
  pub post_build: Option<String>,
  pub hook_timeout: Option<Duration>,
}

/// A buildable image backed by a configuration file, assembled from a
/// declared set of package contents. Same lock and freshness shape as
/// [`super::Package`].
pub struct Image {
  source: PathBuf,
  target: PathBuf,
  reference: String,
  config: ImageConfig,
  extra_repositories: Vec<PathBuf>,
  extra_keys: Vec<PathBuf>,
  pre_build: Option<String>,
  post_build: Option<String>,
  hook_timeout: Option<Duration>,
  compiler: Arc<dyn ImageCompiler>,
  last_build: Mutex<Option<SystemTime>>,
}

impl Image {
  pub fn new(
    source: PathBuf,
    target: PathBuf,
    options: ImageOptions,
    compiler: Arc<dyn ImageCompiler>,
  ) -> Result<Self, ConfigError> {
    let config = config::load_image_config(&source)?;
    let reference = options
      .reference
      .unwrap_or_else(|| format!("{}:latest", basename(&source)));

    Ok(Self {
      source,
      target,
      reference,
      config,
      extra_repositories: options.extra_repositories,
      extra_keys: options.extra_keys,
      pre_build: options.pre_build,
      post_build: options.post_build,
      hook_timeout: options.hook_timeout,
      compiler,
      last_build: Mutex::new(None),
    })
  }

  pub fn source(&self) -> &Path {
    &self.source
  }

  pub fn reference(&self) -> &str {
    &self.reference
  }

  /// Package names this image requires in its content set.
  pub fn required_packages(&self) -> &[String] {
    &self.config.contents.packages
  }

  /// Where the finished OCI tarball lands.
  pub fn output_path(&self) -> PathBuf {
    self.target.join(format!("{}.tar.gz", basename(&self.source)))
  }

  fn source_dir(&self) -> PathBuf {
    self
      .source
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."))
  }

  /// Build this image: filesystem layer first, then the OCI tarball.
  pub async fn build(&self) -> Result<BuildOutcome, BuildError> {
    let mut last_build = self.last_build.lock().await;

    if source_is_fresh(&self.source, *last_build)? {
      debug!(image = %self.reference, "config unchanged, skipping build");
      return Ok(BuildOutcome::Fresh);
    }

    *last_build = Some(SystemTime::now());

    if let Some(cmd) = &self.pre_build {
      run_hook(cmd, &self.source_dir(), self.hook_timeout)
        .await
        .map_err(BuildError::PreBuild)?;
    }

    info!(image = %self.reference, "building image");

    let work_dir = tempfile::tempdir().map_err(BuildError::WorkDir)?;
    let spec = LayerSpec {
      config: self.source.clone(),
      work_dir: work_dir.path().to_path_buf(),
      reference: self.reference.clone(),
      extra_repositories: self.extra_repositories.clone(),
      extra_keys: self.extra_keys.clone(),
    };

    let layer = self.compiler.build_layer(&spec).await.map_err(BuildError::Layer)?;

    self
      .compiler
      .package_image(&self.reference, &layer, &self.output_path())
      .await
      .map_err(BuildError::Package)?;

    if let Some(cmd) = &self.post_build {
      run_hook(cmd, &self.source_dir(), self.hook_timeout)
        .await
        .map_err(BuildError::PostBuild)?;
    }

    Ok(BuildOutcome::Built)
  }
}

/// Config file name without its extension.
fn basename(path: &Path) -> String {
  path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| "image".to_string())
}
