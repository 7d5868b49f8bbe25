//! Package artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::compiler::{PackageBuildSpec, PackageCompiler};
use crate::config::{self, ConfigError, PackageConfig};

use super::hooks::run_hook;
use super::{BuildError, BuildOutcome, source_is_fresh};

/// Per-package settings beyond the recipe itself.
#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
  pub signing_key: Option<PathBuf>,
  pub pre_build: Option<String>,
  pub post_build: Option<String>,
  pub hook_timeout: Option<Duration>,
}

/// A buildable package backed by a recipe file.
///
/// The recipe path is the package's identity. At most one build is in
/// flight at a time; concurrent callers serialize on the build lock and
/// each re-evaluates the incremental guard.
pub struct Package {
  source: PathBuf,
  target: PathBuf,
  config: PackageConfig,
  options: PackageOptions,
  compiler: Arc<dyn PackageCompiler>,
  last_build: Mutex<Option<SystemTime>>,
}

impl Package {
  /// Read the recipe at `source` and construct the package.
  ///
  /// When the compiled artifact for the first declared architecture already
  /// exists under `target`, its modification time primes the last-build
  /// timestamp so a restart does not rebuild up-to-date packages.
  pub fn new(
    source: PathBuf,
    target: PathBuf,
    options: PackageOptions,
    compiler: Arc<dyn PackageCompiler>,
  ) -> Result<Self, ConfigError> {
    let config = config::load_package_config(&source)?;
    let last_build = existing_artifact_mtime(&target, &config);

    Ok(Self {
      source,
      target,
      config,
      options,
      compiler,
      last_build: Mutex::new(last_build),
    })
  }

  pub fn name(&self) -> &str {
    &self.config.package.name
  }

  pub fn source(&self) -> &Path {
    &self.source
  }

  pub fn architectures(&self) -> Vec<String> {
    self.config.architectures()
  }

  /// True if `name` is this package's primary name or one of its
  /// subpackage names.
  pub fn provides(&self, name: &str) -> bool {
    self.config.package.name == name || self.config.subpackages.iter().any(|sub| sub.name == name)
  }

  fn source_dir(&self) -> PathBuf {
    self
      .source
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."))
  }

  /// Build this package, once per declared architecture.
  ///
  /// Skips entirely when the recipe is older than the last build attempt.
  /// The timestamp advances before any work happens, so a failed attempt
  /// still counts for the freshness check.
  pub async fn build(&self) -> Result<BuildOutcome, BuildError> {
    let mut last_build = self.last_build.lock().await;

    if source_is_fresh(&self.source, *last_build)? {
      debug!(package = %self.name(), "recipe unchanged, skipping build");
      return Ok(BuildOutcome::Fresh);
    }

    *last_build = Some(SystemTime::now());

    if let Some(cmd) = &self.options.pre_build {
      run_hook(cmd, &self.source_dir(), self.options.hook_timeout)
        .await
        .map_err(BuildError::PreBuild)?;
    }

    for arch in self.config.architectures() {
      info!(package = %self.name(), arch = %arch, "building package");

      let spec = PackageBuildSpec {
        config: self.source.clone(),
        out_dir: self.target.clone(),
        source_dir: self.source_dir(),
        arch: arch.clone(),
        signing_key: self.options.signing_key.clone(),
        generate_index: false,
      };

      self
        .compiler
        .compile(&spec)
        .await
        .map_err(|source| BuildError::Compile { arch, source })?;
    }

    if let Some(cmd) = &self.options.post_build {
      run_hook(cmd, &self.source_dir(), self.options.hook_timeout)
        .await
        .map_err(BuildError::PostBuild)?;
    }

    Ok(BuildOutcome::Built)
  }
}

/// Modification time of the already-compiled artifact for the first
/// declared architecture, if present.
fn existing_artifact_mtime(target: &Path, config: &PackageConfig) -> Option<SystemTime> {
  let arch = config.architectures().into_iter().next()?;
  let apk = target.join(arch).join(format!(
    "{}-{}-r{}.apk",
    config.package.name, config.package.version, config.package.epoch
  ));
  std::fs::metadata(apk).ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::compiler::testing::FakeCompiler;
  use std::time::Duration;
  use tempfile::TempDir;

  fn write_recipe(dir: &Path, name: &str, archs: &[&str]) -> PathBuf {
    let path = dir.join(format!("{name}.yaml"));
    let mut doc = format!("package:\n  name: {name}\n  version: 1.0.0\n  epoch: 0\n");
    if !archs.is_empty() {
      doc.push_str("  target-architecture:\n");
      for arch in archs {
        doc.push_str(&format!("    - {arch}\n"));
      }
    }
    std::fs::write(&path, doc).unwrap();
    path
  }

  fn make_package(source: PathBuf, target: PathBuf, compiler: Arc<FakeCompiler>) -> Package {
    Package::new(source, target, PackageOptions::default(), compiler).unwrap()
  }

  #[tokio::test]
  async fn builds_once_per_architecture() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &["x86_64", "aarch64"]);
    let fake = Arc::new(FakeCompiler::new());
    let package = make_package(source, temp.path().join("dist"), fake.clone());

    let outcome = package.build().await.unwrap();

    assert_eq!(outcome, BuildOutcome::Built);
    assert_eq!(
      fake.entries(),
      vec!["pkg:libfoo:x86_64", "pkg:libfoo:aarch64"]
    );
  }

  #[tokio::test]
  async fn second_build_is_fresh() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);
    let fake = Arc::new(FakeCompiler::new());
    let package = make_package(source, temp.path().join("dist"), fake.clone());

    assert_eq!(package.build().await.unwrap(), BuildOutcome::Built);
    assert_eq!(package.build().await.unwrap(), BuildOutcome::Fresh);
    assert_eq!(fake.log().count("pkg:"), 1);
  }

  #[tokio::test]
  async fn rebuilds_after_source_change() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);
    let fake = Arc::new(FakeCompiler::new());
    let package = make_package(source.clone(), temp.path().join("dist"), fake.clone());

    assert_eq!(package.build().await.unwrap(), BuildOutcome::Built);

    std::thread::sleep(Duration::from_millis(20));
    std::fs::write(&source, "package:\n  name: libfoo\n  version: 1.0.1\n").unwrap();

    assert_eq!(package.build().await.unwrap(), BuildOutcome::Built);
    assert_eq!(fake.log().count("pkg:"), 2);
  }

  #[tokio::test]
  async fn concurrent_builds_serialize() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);
    let fake = Arc::new(FakeCompiler::delayed(Duration::from_millis(50)));
    let package = Arc::new(make_package(source, temp.path().join("dist"), fake.clone()));

    let first = tokio::spawn({
      let package = Arc::clone(&package);
      async move { package.build().await.unwrap() }
    });
    let second = tokio::spawn({
      let package = Arc::clone(&package);
      async move { package.build().await.unwrap() }
    });

    let (a, b) = (first.await.unwrap(), second.await.unwrap());

    // The lock serializes the builds; whichever ran second observed the
    // fresh timestamp left behind by the first.
    assert!(!fake.overlapped());
    assert_eq!(fake.log().count("pkg:"), 1);
    assert!(
      (a == BuildOutcome::Built && b == BuildOutcome::Fresh)
        || (a == BuildOutcome::Fresh && b == BuildOutcome::Built)
    );
  }

  #[tokio::test]
  async fn failed_build_still_advances_last_build() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);
    let fake = Arc::new(FakeCompiler::failing(1));
    let package = make_package(source, temp.path().join("dist"), fake.clone());

    let result = package.build().await;
    assert!(matches!(result, Err(BuildError::Compile { .. })));

    // The failed attempt advanced the timestamp, so an unchanged recipe is
    // silently skipped on the next trigger.
    assert_eq!(package.build().await.unwrap(), BuildOutcome::Fresh);
    assert_eq!(fake.log().count("pkg:"), 1);
  }

  #[tokio::test]
  async fn pre_build_failure_aborts_before_compile() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);
    let fake = Arc::new(FakeCompiler::new());
    let options = PackageOptions {
      pre_build: Some("exit 1".to_string()),
      ..PackageOptions::default()
    };
    let package = Package::new(source, temp.path().join("dist"), options, fake.clone()).unwrap();

    let result = package.build().await;

    assert!(matches!(result, Err(BuildError::PreBuild(_))));
    assert_eq!(fake.log().count("pkg:"), 0);
  }

  #[tokio::test]
  async fn post_build_failure_is_reported_after_compile() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);
    let fake = Arc::new(FakeCompiler::new());
    let options = PackageOptions {
      post_build: Some("exit 1".to_string()),
      ..PackageOptions::default()
    };
    let package = Package::new(source, temp.path().join("dist"), options, fake.clone()).unwrap();

    let result = package.build().await;

    assert!(matches!(result, Err(BuildError::PostBuild(_))));
    assert_eq!(fake.log().count("pkg:"), 1);
  }

  #[tokio::test]
  async fn primes_last_build_from_existing_artifact() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);

    std::thread::sleep(Duration::from_millis(20));
    let arch_dir = temp.path().join("dist/x86_64");
    std::fs::create_dir_all(&arch_dir).unwrap();
    std::fs::write(arch_dir.join("libfoo-1.0.0-r0.apk"), b"").unwrap();

    let fake = Arc::new(FakeCompiler::new());
    let package = make_package(source, temp.path().join("dist"), fake.clone());

    assert_eq!(package.build().await.unwrap(), BuildOutcome::Fresh);
    assert_eq!(fake.log().count("pkg:"), 0);
  }

  #[tokio::test]
  async fn no_priming_without_existing_artifact() {
    let temp = TempDir::new().unwrap();
    let source = write_recipe(temp.path(), "libfoo", &[]);
    let fake = Arc::new(FakeCompiler::new());
    let package = make_package(source, temp.path().join("dist"), fake.clone());

    assert_eq!(package.build().await.unwrap(), BuildOutcome::Built);
  }

  #[test]
  fn provides_matches_primary_and_subpackage_names() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("libfoo.yaml");
    std::fs::write(
      &path,
      "package:\n  name: libfoo\n  version: 1.0.0\nsubpackages:\n  - name: libfoo-dev\n",
    )
    .unwrap();

    let fake = Arc::new(FakeCompiler::new());
    let package = make_package(path, temp.path().join("dist"), fake);

    assert!(package.provides("libfoo"));
    assert!(package.provides("libfoo-dev"));
    assert!(!package.provides("libbar"));
  }
}
