//! Workspace settings: CLI flags layered over the config file.
//!
//! Every flag has a `KILN_*` env fallback and a counterpart in `kiln.yaml`.
//! Precedence is flags over file over defaults. A missing config file is
//! not an error; a malformed one is.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use kiln_lib::artifact::{Image, ImageOptions, Package, PackageOptions};
use kiln_lib::builder::{Builder, BuilderOptions};
use kiln_lib::compiler::{ApkoCli, MelangeCli, MelangeIndex};
use kiln_lib::graph::DependantMatch;

/// Global CLI flags shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct SettingsArgs {
  /// Workspace config file
  #[arg(short = 'f', long, env = "KILN_CONFIG_FILE", default_value = "kiln.yaml", global = true)]
  pub config_file: PathBuf,

  /// Key used to sign packages and regenerated indexes
  #[arg(long, env = "KILN_SIGNING_KEY", global = true)]
  pub signing_key: Option<PathBuf>,

  /// Extra trusted keys included in image builds
  #[arg(long, env = "KILN_KEYRING_APPEND", global = true)]
  pub keyring_append: Vec<PathBuf>,

  /// Extra package repositories included in image builds
  #[arg(long, env = "KILN_REPOSITORY_APPEND", global = true)]
  pub repository_append: Vec<PathBuf>,

  /// Package recipe paths (glob patterns)
  #[arg(long = "package-source", env = "KILN_PACKAGE_SOURCE", global = true)]
  pub package_source: Vec<String>,

  /// Package output directory
  #[arg(long = "package-target", env = "KILN_PACKAGE_TARGET", global = true)]
  pub package_target: Option<PathBuf>,

  /// Command run before each package build
  #[arg(long = "package-prebuild", env = "KILN_PACKAGE_PREBUILD", global = true)]
  pub package_prebuild: Option<String>,

  /// Command run after each package build
  #[arg(long = "package-postbuild", env = "KILN_PACKAGE_POSTBUILD", global = true)]
  pub package_postbuild: Option<String>,

  /// Image config paths (glob patterns)
  #[arg(long = "image-source", env = "KILN_IMAGE_SOURCE", global = true)]
  pub image_source: Vec<String>,

  /// Image output directory
  #[arg(long = "image-target", env = "KILN_IMAGE_TARGET", global = true)]
  pub image_target: Option<PathBuf>,

  /// Command run before each image build
  #[arg(long = "image-prebuild", env = "KILN_IMAGE_PREBUILD", global = true)]
  pub image_prebuild: Option<String>,

  /// Command run after each image build
  #[arg(long = "image-postbuild", env = "KILN_IMAGE_POSTBUILD", global = true)]
  pub image_postbuild: Option<String>,

  /// Image reference overrides, keyed by config base name
  #[arg(long = "image-ref", value_parser = parse_ref, value_name = "NAME=REF", global = true)]
  pub image_ref: Vec<(String, String)>,

  /// Bound for pre/post-build hook runtime (e.g. 30s); unbounded when unset
  #[arg(long, env = "KILN_HOOK_TIMEOUT", value_parser = humantime::parse_duration, global = true)]
  pub hook_timeout: Option<Duration>,

  /// Number of parallel build jobs; defaults to the logical CPU count
  #[arg(long, env = "KILN_JOBS", global = true)]
  pub jobs: Option<usize>,

  /// Match dependant images through subpackage aliases too
  #[arg(long, env = "KILN_SYMMETRIC_DEPENDANTS", global = true)]
  pub symmetric_dependants: bool,
}

/// Parse a `<name>=<ref>` pair.
fn parse_ref(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(name, reference)| (name.to_string(), reference.to_string()))
    .ok_or_else(|| format!("expected <name>=<ref>, got '{s}'"))
}

/// `kiln.yaml` shape; mirrors the flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
  signing_key: Option<PathBuf>,
  keyring_append: Vec<PathBuf>,
  repository_append: Vec<PathBuf>,
  package: FileSection,
  image: ImageFileSection,
  hook_timeout: Option<String>,
  jobs: Option<usize>,
  symmetric_dependants: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSection {
  source: Vec<String>,
  target: Option<PathBuf>,
  prebuild: Option<String>,
  postbuild: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageFileSection {
  source: Vec<String>,
  target: Option<PathBuf>,
  prebuild: Option<String>,
  postbuild: Option<String>,
  #[serde(rename = "ref")]
  refs: BTreeMap<String, String>,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
  pub signing_key: Option<PathBuf>,
  pub keyring_append: Vec<PathBuf>,
  pub repository_append: Vec<PathBuf>,
  pub package: SectionSettings,
  pub image: SectionSettings,
  pub image_refs: BTreeMap<String, String>,
  pub hook_timeout: Option<Duration>,
  pub jobs: Option<usize>,
  pub symmetric_dependants: bool,
}

#[derive(Debug, Clone)]
pub struct SectionSettings {
  pub sources: Vec<String>,
  pub target: PathBuf,
  pub pre_build: Option<String>,
  pub post_build: Option<String>,
}

impl Settings {
  /// Layer flags over the config file over defaults.
  pub fn resolve(args: &SettingsArgs) -> Result<Self> {
    let file = match std::fs::read_to_string(&args.config_file) {
      Ok(raw) => serde_yaml::from_str::<FileConfig>(&raw)
        .with_context(|| format!("failed to parse {}", args.config_file.display()))?,
      // A missing config file just means flag-only operation.
      Err(_) => FileConfig::default(),
    };

    let hook_timeout = match (args.hook_timeout, &file.hook_timeout) {
      (Some(timeout), _) => Some(timeout),
      (None, Some(raw)) => {
        Some(humantime::parse_duration(raw).with_context(|| format!("invalid hook_timeout '{raw}'"))?)
      }
      (None, None) => None,
    };

    let mut image_refs = file.image.refs.clone();
    for (name, reference) in &args.image_ref {
      image_refs.insert(name.clone(), reference.clone());
    }

    Ok(Self {
      signing_key: args.signing_key.clone().or(file.signing_key),
      keyring_append: pick_list(&args.keyring_append, file.keyring_append),
      repository_append: pick_list(&args.repository_append, file.repository_append),
      package: SectionSettings {
        sources: pick_list(&args.package_source, file.package.source),
        target: args
          .package_target
          .clone()
          .or(file.package.target)
          .unwrap_or_else(|| PathBuf::from("dist/packages")),
        pre_build: args.package_prebuild.clone().or(file.package.prebuild),
        post_build: args.package_postbuild.clone().or(file.package.postbuild),
      },
      image: SectionSettings {
        sources: pick_list(&args.image_source, file.image.source),
        target: args
          .image_target
          .clone()
          .or(file.image.target)
          .unwrap_or_else(|| PathBuf::from("dist/images")),
        pre_build: args.image_prebuild.clone().or(file.image.prebuild),
        post_build: args.image_postbuild.clone().or(file.image.postbuild),
      },
      image_refs,
      hook_timeout,
      jobs: args.jobs.or(file.jobs),
      symmetric_dependants: args.symmetric_dependants || file.symmetric_dependants.unwrap_or(false),
    })
  }
}

/// Flags win over the file when any were given.
fn pick_list<T: Clone>(flags: &[T], file: Vec<T>) -> Vec<T> {
  if flags.is_empty() { file } else { flags.to_vec() }
}

/// Expand glob patterns into concrete paths.
fn expand(patterns: &[String]) -> Result<Vec<PathBuf>> {
  let mut paths = Vec::new();
  for pattern in patterns {
    let matches = glob::glob(pattern).with_context(|| format!("invalid glob pattern '{pattern}'"))?;
    for entry in matches {
      paths.push(entry.with_context(|| format!("failed to read glob match for '{pattern}'"))?);
    }
  }
  Ok(paths)
}

/// Construct the artifact collection and the scheduler from settings.
pub fn load_builder(settings: &Settings) -> Result<Builder> {
  let package_compiler = Arc::new(MelangeCli::default());
  let image_compiler = Arc::new(ApkoCli::default());

  let mut packages = Vec::new();
  for source in expand(&settings.package.sources)? {
    let options = PackageOptions {
      signing_key: settings.signing_key.clone(),
      pre_build: settings.package.pre_build.clone(),
      post_build: settings.package.post_build.clone(),
      hook_timeout: settings.hook_timeout,
    };
    let package = Package::new(source, settings.package.target.clone(), options, package_compiler.clone())?;
    packages.push(Arc::new(package));
  }

  // Images consume locally built packages, so the package target joins
  // their repository list.
  let package_repo = std::path::absolute(&settings.package.target)
    .with_context(|| format!("failed to resolve {}", settings.package.target.display()))?;

  let mut images = Vec::new();
  for source in expand(&settings.image.sources)? {
    let basename = source
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_default();

    let mut extra_repositories = settings.repository_append.clone();
    extra_repositories.push(package_repo.clone());

    let options = ImageOptions {
      reference: settings.image_refs.get(&basename).cloned(),
      extra_repositories,
      extra_keys: settings.keyring_append.clone(),
      pre_build: settings.image.pre_build.clone(),
      post_build: settings.image.post_build.clone(),
      hook_timeout: settings.hook_timeout,
    };
    let image = Image::new(source, settings.image.target.clone(), options, image_compiler.clone())?;
    images.push(Arc::new(image));
  }

  let mut options = BuilderOptions::default();
  if let Some(jobs) = settings.jobs {
    options.parallelism = jobs;
  }
  options.dependant_match = if settings.symmetric_dependants {
    DependantMatch::Aliases
  } else {
    DependantMatch::Primary
  };
  options.signing_key = settings.signing_key.clone();
  options.indexer = Some(Arc::new(MelangeIndex::default()));
  options.package_target = settings.package.target.clone();

  Ok(Builder::new(packages, images, options))
}
