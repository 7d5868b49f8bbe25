//! Artifact configuration models.
//!
//! Packages are described by melange-style recipes and images by apko-style
//! configs. Only the fields the orchestrator needs are modelled here; the
//! external compilers re-read the full files themselves.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Architecture assumed when a recipe declares none.
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

/// Errors raised while loading artifact configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The config file could not be read.
  #[error("failed to read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The config file is not valid YAML for the expected shape.
  #[error("failed to parse {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

/// A package build recipe (melange-style).
#[derive(Debug, Clone, Deserialize)]
pub struct PackageConfig {
  pub package: PackageSection,

  #[serde(default)]
  pub subpackages: Vec<Subpackage>,
}

/// The `package:` section of a recipe.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageSection {
  pub name: String,

  pub version: String,

  #[serde(default)]
  pub epoch: u64,

  /// Architectures to compile for. Empty means [`DEFAULT_ARCHITECTURE`].
  #[serde(default, rename = "target-architecture")]
  pub target_architecture: Vec<String>,
}

/// A subpackage declaration. Subpackage names are aliases under which the
/// parent package can be referenced as an image dependency.
#[derive(Debug, Clone, Deserialize)]
pub struct Subpackage {
  pub name: String,
}

impl PackageConfig {
  /// Architectures this package is compiled for, with the default applied.
  pub fn architectures(&self) -> Vec<String> {
    if self.package.target_architecture.is_empty() {
      vec![DEFAULT_ARCHITECTURE.to_string()]
    } else {
      self.package.target_architecture.clone()
    }
  }
}

/// An image configuration (apko-style).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
  #[serde(default)]
  pub contents: ImageContents,

  #[serde(default)]
  pub archs: Vec<String>,
}

/// The `contents:` section of an image configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageContents {
  #[serde(default)]
  pub repositories: Vec<String>,

  /// Package names this image's content set must include. Names may refer
  /// to a package's primary name or any of its subpackage names.
  #[serde(default)]
  pub packages: Vec<String>,
}

/// Load and parse a package recipe.
pub fn load_package_config(path: &Path) -> Result<PackageConfig, ConfigError> {
  let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

/// Load and parse an image configuration.
pub fn load_image_config(path: &Path) -> Result<ImageConfig, ConfigError> {
  let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn parse_full_package_config() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("libfoo.yaml");
    std::fs::write(
      &path,
      r#"
package:
  name: libfoo
  version: 1.2.3
  epoch: 4
  target-architecture:
    - x86_64
    - aarch64
subpackages:
  - name: libfoo-dev
  - name: libfoo-doc
"#,
    )
    .unwrap();

    let config = load_package_config(&path).unwrap();
    assert_eq!(config.package.name, "libfoo");
    assert_eq!(config.package.version, "1.2.3");
    assert_eq!(config.package.epoch, 4);
    assert_eq!(config.architectures(), vec!["x86_64", "aarch64"]);

    let subs: Vec<_> = config.subpackages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(subs, vec!["libfoo-dev", "libfoo-doc"]);
  }

  #[test]
  fn package_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("minimal.yaml");
    std::fs::write(&path, "package:\n  name: minimal\n  version: 0.1.0\n").unwrap();

    let config = load_package_config(&path).unwrap();
    assert_eq!(config.package.epoch, 0);
    assert!(config.subpackages.is_empty());
    assert_eq!(config.architectures(), vec![DEFAULT_ARCHITECTURE]);
  }

  #[test]
  fn parse_image_config() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("base.yaml");
    std::fs::write(
      &path,
      r#"
contents:
  repositories:
    - https://packages.example.org/os
  packages:
    - libfoo
    - libfoo-dev
archs:
  - x86_64
"#,
    )
    .unwrap();

    let config = load_image_config(&path).unwrap();
    assert_eq!(config.contents.packages, vec!["libfoo", "libfoo-dev"]);
    assert_eq!(config.contents.repositories.len(), 1);
    assert_eq!(config.archs, vec!["x86_64"]);
  }

  #[test]
  fn image_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("empty.yaml");
    std::fs::write(&path, "{}\n").unwrap();

    let config = load_image_config(&path).unwrap();
    assert!(config.contents.packages.is_empty());
    assert!(config.archs.is_empty());
  }

  #[test]
  fn missing_file_is_a_read_error() {
    let result = load_package_config(Path::new("/nonexistent/recipe.yaml"));
    assert!(matches!(result, Err(ConfigError::Read { .. })));
  }

  #[test]
  fn invalid_yaml_is_a_parse_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.yaml");
    std::fs::write(&path, "package: [not, a, mapping]\n").unwrap();

    let result = load_package_config(&path);
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
  }
}
