//! Package compilation and index generation via the melange CLI.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{CompilerError, IndexGenerator, PackageBuildSpec, PackageCompiler, run_checked};

/// Invokes `melange build` once per architecture.
#[derive(Debug, Clone)]
pub struct MelangeCli {
  program: PathBuf,
}

impl MelangeCli {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }
}

impl Default for MelangeCli {
  fn default() -> Self {
    Self::new("melange")
  }
}

/// Assemble the argument vector for one `melange build` invocation.
fn build_args(spec: &PackageBuildSpec) -> Vec<OsString> {
  let mut args: Vec<OsString> = vec![
    "build".into(),
    spec.config.clone().into(),
    "--arch".into(),
    spec.arch.clone().into(),
    "--out-dir".into(),
    spec.out_dir.clone().into(),
    "--source-dir".into(),
    spec.source_dir.clone().into(),
  ];

  if let Some(key) = &spec.signing_key {
    args.push("--signing-key".into());
    args.push(key.clone().into());
  }

  if !spec.generate_index {
    args.push("--generate-index=false".into());
  }

  args
}

#[async_trait]
impl PackageCompiler for MelangeCli {
  async fn compile(&self, spec: &PackageBuildSpec) -> Result<(), CompilerError> {
    info!(
      config = %spec.config.display(),
      arch = %spec.arch,
      "compiling package"
    );
    run_checked(&self.program, &build_args(spec)).await
  }
}

/// Invokes `melange index` over the apk files of one architecture directory.
#[derive(Debug, Clone)]
pub struct MelangeIndex {
  program: PathBuf,
}

impl MelangeIndex {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
    }
  }
}

impl Default for MelangeIndex {
  fn default() -> Self {
    Self::new("melange")
  }
}

/// Assemble the argument vector for one `melange index` invocation, listing
/// every apk file under `arch_dir` in a stable order.
fn index_args(arch_dir: &Path, index: &Path, signing_key: Option<&Path>) -> Result<Vec<OsString>, CompilerError> {
  let mut args: Vec<OsString> = vec!["index".into(), "-o".into(), index.to_path_buf().into()];

  if let Some(key) = signing_key {
    args.push("--signing-key".into());
    args.push(key.to_path_buf().into());
  }

  let mut apks: Vec<PathBuf> = std::fs::read_dir(arch_dir)?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.extension().is_some_and(|ext| ext == "apk"))
    .collect();
  apks.sort();

  args.extend(apks.into_iter().map(OsString::from));
  Ok(args)
}

#[async_trait]
impl IndexGenerator for MelangeIndex {
  async fn generate(&self, arch_dir: &Path, index: &Path, signing_key: Option<&Path>) -> Result<(), CompilerError> {
    info!(dir = %arch_dir.display(), "regenerating package index");
    let args = index_args(arch_dir, index, signing_key)?;
    run_checked(&self.program, &args).await
  }
}
