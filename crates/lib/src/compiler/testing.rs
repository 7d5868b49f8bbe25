//! Recording compiler fakes for scheduler and watch tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CompilerError, ImageCompiler, IndexGenerator, LayerSpec, PackageBuildSpec, PackageCompiler};

/// Shared, ordered record of compiler invocations.
#[derive(Debug, Default)]
pub struct BuildLog {
  entries: Mutex<Vec<String>>,
}

impl BuildLog {
  pub fn record(&self, entry: impl Into<String>) {
    self.entries.lock().unwrap().push(entry.into());
  }

  pub fn entries(&self) -> Vec<String> {
    self.entries.lock().unwrap().clone()
  }

  /// Number of entries starting with `prefix`.
  pub fn count(&self, prefix: &str) -> usize {
    self.entries().iter().filter(|e| e.starts_with(prefix)).count()
  }

  /// Index of the first entry starting with `prefix`.
  pub fn first(&self, prefix: &str) -> Option<usize> {
    self.entries().iter().position(|e| e.starts_with(prefix))
  }

  /// Index of the last entry starting with `prefix`.
  pub fn last(&self, prefix: &str) -> Option<usize> {
    self.entries().iter().rposition(|e| e.starts_with(prefix))
  }
}

fn stem(path: &Path) -> String {
  path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default()
}

/// A fake implementing every compiler trait. Records entries of the form
/// `pkg:<recipe>:<arch>`, `layer:<config>`, `image:<reference>` and
/// `index:<arch>` into its [`BuildLog`], and detects overlapping
/// invocations.
#[derive(Debug, Default)]
pub struct FakeCompiler {
  log: BuildLog,
  delay: Option<Duration>,
  fail_remaining: AtomicUsize,
  in_flight: AtomicUsize,
  overlapped: AtomicBool,
}

impl FakeCompiler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sleep inside every invocation, to widen race windows.
  pub fn delayed(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::default()
    }
  }

  /// Fail the first `times` invocations, succeed afterwards.
  pub fn failing(times: usize) -> Self {
    let fake = Self::new();
    fake.fail_remaining.store(times, Ordering::SeqCst);
    fake
  }

  pub fn entries(&self) -> Vec<String> {
    self.log.entries()
  }

  pub fn log(&self) -> &BuildLog {
    &self.log
  }

  /// True if two invocations ever ran concurrently.
  pub fn overlapped(&self) -> bool {
    self.overlapped.load(Ordering::SeqCst)
  }

  async fn invoke(&self, entry: String) -> Result<(), CompilerError> {
    if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
      self.overlapped.store(true, Ordering::SeqCst);
    }
    self.log.record(entry);

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if self.fail_remaining.load(Ordering::SeqCst) > 0 {
      self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
      return Err(CompilerError::Failed {
        program: "fake".to_string(),
        code: Some(1),
        stderr: "forced failure".to_string(),
      });
    }

    Ok(())
  }
}

#[async_trait]
impl PackageCompiler for FakeCompiler {
  async fn compile(&self, spec: &PackageBuildSpec) -> Result<(), CompilerError> {
    self.invoke(format!("pkg:{}:{}", stem(&spec.config), spec.arch)).await
  }
}

#[async_trait]
impl ImageCompiler for FakeCompiler {
  async fn build_layer(&self, spec: &LayerSpec) -> Result<PathBuf, CompilerError> {
    self.invoke(format!("layer:{}", stem(&spec.config))).await?;
    Ok(spec.work_dir.join("layer.tar.gz"))
  }

  async fn package_image(&self, reference: &str, _layer: &Path, _output: &Path) -> Result<(), CompilerError> {
    self.log.record(format!("image:{reference}"));
    Ok(())
  }
}

#[async_trait]
impl IndexGenerator for FakeCompiler {
  async fn generate(&self, arch_dir: &Path, _index: &Path, _signing_key: Option<&Path>) -> Result<(), CompilerError> {
    let arch = arch_dir
      .file_name()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    self.log.record(format!("index:{arch}"));
    Ok(())
  }
}
