//! Bounded-concurrency build scheduler.
//!
//! The `Builder` owns the full artifact collection for the process lifetime
//! and turns the static dependency relation into concurrent, ordered
//! execution. Parallelism is bounded by a semaphore sized to the available
//! processing units; submissions past that bound wait for a slot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::artifact::{BuildError, BuildOutcome, Image, Package};
use crate::compiler::IndexGenerator;
use crate::graph::{self, DependantMatch};

/// Name of the per-architecture apk index file.
const INDEX_FILE: &str = "APKINDEX.tar.gz";

/// Cooperative cancellation flag shared between a caller and the build
/// groups it started. Cancelling stops new task starts; work already
/// handed to an external compiler runs to completion.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Scheduler configuration.
pub struct BuilderOptions {
  /// Maximum number of builds in flight at once.
  pub parallelism: usize,

  /// How dependant images are matched to packages in watch mode.
  pub dependant_match: DependantMatch,

  /// Key used to sign regenerated indexes.
  pub signing_key: Option<PathBuf>,

  /// Regenerates per-architecture indexes between package and image
  /// builds. None disables index regeneration.
  pub indexer: Option<Arc<dyn IndexGenerator>>,

  /// Directory compiled packages land in; indexes are regenerated in its
  /// per-architecture subdirectories.
  pub package_target: PathBuf,
}

impl Default for BuilderOptions {
  fn default() -> Self {
    Self {
      parallelism: default_parallelism(),
      dependant_match: DependantMatch::default(),
      signing_key: None,
      indexer: None,
      package_target: PathBuf::from("dist/packages"),
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn default_parallelism() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Counts from a full build run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
  pub packages_built: usize,
  pub packages_fresh: usize,
  pub images_built: usize,
  pub images_fresh: usize,
}

impl BuildSummary {
  pub fn total(&self) -> usize {
    self.packages_built + self.packages_fresh + self.images_built + self.images_fresh
  }

  fn count(&mut self, outcome: BuildOutcome, image: bool) {
    match (outcome, image) {
      (BuildOutcome::Built, false) => self.packages_built += 1,
      (BuildOutcome::Fresh, false) => self.packages_fresh += 1,
      (BuildOutcome::Built, true) => self.images_built += 1,
      (BuildOutcome::Fresh, true) => self.images_fresh += 1,
      (BuildOutcome::Cancelled, _) => {}
    }
  }
}

/// Owns the artifact collection and the worker pool.
pub struct Builder {
  packages: Vec<Arc<Package>>,
  images: Vec<Arc<Image>>,
  limiter: Arc<Semaphore>,
  dependant_match: DependantMatch,
  signing_key: Option<PathBuf>,
  indexer: Option<Arc<dyn IndexGenerator>>,
  package_target: PathBuf,
}

impl Builder {
  pub fn new(packages: Vec<Arc<Package>>, images: Vec<Arc<Image>>, options: BuilderOptions) -> Self {
    Self {
      packages,
      images,
      limiter: Arc::new(Semaphore::new(options.parallelism.max(1))),
      dependant_match: options.dependant_match,
      signing_key: options.signing_key,
      indexer: options.indexer,
      package_target: options.package_target,
    }
  }

  pub fn packages(&self) -> &[Arc<Package>] {
    &self.packages
  }

  pub fn images(&self) -> &[Arc<Image>] {
    &self.images
  }

  /// Packages the image's content set requires.
  pub fn dependencies_of(&self, image: &Image) -> Vec<Arc<Package>> {
    graph::dependencies_of(&self.packages, image)
  }

  /// Images that require the package.
  pub fn dependants_of(&self, package: &Package) -> Vec<Arc<Image>> {
    graph::dependants_of(&self.images, package, self.dependant_match)
  }

  /// Identity lookup by configuration file path.
  pub fn find(&self, source: &Path) -> (Option<Arc<Package>>, Option<Arc<Image>>) {
    graph::find(&self.packages, &self.images, source)
  }

  /// Every artifact source path, for watcher registration.
  pub fn watch_paths(&self) -> Vec<PathBuf> {
    self
      .packages
      .iter()
      .map(|p| p.source().to_path_buf())
      .chain(self.images.iter().map(|i| i.source().to_path_buf()))
      .collect()
  }

  /// Build an image together with its package dependencies.
  ///
  /// Every dependency build is submitted to the pool and joined before the
  /// image itself builds. On any dependency failure the first error is
  /// returned and the image build never starts; siblings already running
  /// are not interrupted, they are joined like everything else.
  pub async fn build_image_with_deps(&self, image: &Arc<Image>, cancel: &Cancel) -> Result<BuildOutcome, BuildError> {
    let deps = self.dependencies_of(image);
    debug!(
      image = %image.reference(),
      dependencies = deps.len(),
      "building image with dependencies"
    );

    let mut group: JoinSet<(String, Result<BuildOutcome, BuildError>)> = JoinSet::new();
    for dep in deps {
      if cancel.is_cancelled() {
        break;
      }
      let limiter = Arc::clone(&self.limiter);
      group.spawn(async move {
        let _permit = limiter.acquire_owned().await.unwrap();
        let name = dep.name().to_string();
        (name, dep.build().await)
      });
    }

    let mut first_error = None;
    while let Some(joined) = group.join_next().await {
      match joined {
        Ok((name, Ok(outcome))) => debug!(package = %name, ?outcome, "dependency ready"),
        Ok((name, Err(err))) => {
          error!(package = %name, error = %err, "dependency build failed");
          if first_error.is_none() {
            first_error = Some(err);
          }
        }
        Err(err) => error!(error = %err, "dependency build task panicked"),
      }
    }

    if let Some(err) = first_error {
      return Err(err);
    }
    if cancel.is_cancelled() {
      return Ok(BuildOutcome::Cancelled);
    }

    self.regenerate_indexes().await?;
    image.build().await
  }

  /// Build everything: all packages first, then all images.
  ///
  /// The package phase is a full barrier; no image build starts before
  /// every package build has finished, independent of per-image dependency
  /// declarations. Each phase runs fully parallel within the pool bound.
  pub async fn build_all(&self, cancel: &Cancel) -> Result<BuildSummary, BuildError> {
    info!(
      packages = self.packages.len(),
      images = self.images.len(),
      "building all artifacts"
    );

    let mut summary = BuildSummary::default();

    let mut group: JoinSet<(String, Result<BuildOutcome, BuildError>)> = JoinSet::new();
    for package in &self.packages {
      if cancel.is_cancelled() {
        break;
      }
      let package = Arc::clone(package);
      let limiter = Arc::clone(&self.limiter);
      group.spawn(async move {
        let _permit = limiter.acquire_owned().await.unwrap();
        let name = package.name().to_string();
        (name, package.build().await)
      });
    }

    let mut first_error = None;
    while let Some(joined) = group.join_next().await {
      match joined {
        Ok((name, Ok(outcome))) => {
          debug!(package = %name, ?outcome, "package build finished");
          summary.count(outcome, false);
        }
        Ok((name, Err(err))) => {
          error!(package = %name, error = %err, "package build failed");
          if first_error.is_none() {
            first_error = Some(err);
          }
        }
        Err(err) => error!(error = %err, "package build task panicked"),
      }
    }

    if let Some(err) = first_error {
      return Err(err);
    }
    if cancel.is_cancelled() {
      return Ok(summary);
    }

    self.regenerate_indexes().await?;

    let mut group: JoinSet<(String, Result<BuildOutcome, BuildError>)> = JoinSet::new();
    for image in &self.images {
      if cancel.is_cancelled() {
        break;
      }
      let image = Arc::clone(image);
      let limiter = Arc::clone(&self.limiter);
      group.spawn(async move {
        let _permit = limiter.acquire_owned().await.unwrap();
        let reference = image.reference().to_string();
        (reference, image.build().await)
      });
    }

    let mut first_error = None;
    while let Some(joined) = group.join_next().await {
      match joined {
        Ok((reference, Ok(outcome))) => {
          debug!(image = %reference, ?outcome, "image build finished");
          summary.count(outcome, true);
        }
        Ok((reference, Err(err))) => {
          error!(image = %reference, error = %err, "image build failed");
          if first_error.is_none() {
            first_error = Some(err);
          }
        }
        Err(err) => error!(error = %err, "image build task panicked"),
      }
    }

    if let Some(err) = first_error {
      return Err(err);
    }

    Ok(summary)
  }

  /// Regenerate the apk index for every architecture any package declares.
  /// Runs after a package batch, before dependent images consume it.
  async fn regenerate_indexes(&self) -> Result<(), BuildError> {
    let Some(indexer) = &self.indexer else {
      return Ok(());
    };

    let mut archs: Vec<String> = Vec::new();
    for package in &self.packages {
      for arch in package.architectures() {
        if !archs.contains(&arch) {
          archs.push(arch);
        }
      }
    }

    for arch in archs {
      let arch_dir = self.package_target.join(&arch);
      let index = arch_dir.join(INDEX_FILE);
      indexer
        .generate(&arch_dir, &index, self.signing_key.as_deref())
        .await
        .map_err(|source| BuildError::Index { arch, source })?;
    }

    Ok(())
  }
}
