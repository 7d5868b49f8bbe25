//! Dependency queries over the artifact collection.
//!
//! The relation between images and packages is shallow and static, so there
//! is no retained graph structure: every query rescans the flat lists.
//! Packages never depend on images, and there are no package-to-package or
//! image-to-image edges.

use std::path::Path;
use std::sync::Arc;

use crate::artifact::{Image, Package};

/// How dependant images are matched to a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DependantMatch {
  /// Only the package's primary name counts. An image that references a
  /// package solely through a subpackage name is not considered a
  /// dependant, even though the forward query matches subpackage names.
  /// This asymmetry is the compatible default.
  #[default]
  Primary,

  /// Subpackage names count too, making the relation symmetric with
  /// [`dependencies_of`].
  Aliases,
}

/// Packages the image's content set requires.
///
/// A package matches a required name when its primary name or any of its
/// subpackage names equals it. Results are in package registration order; a
/// package matching several of the image's required names appears once per
/// match, so duplicates are possible and are not deduplicated.
pub fn dependencies_of(packages: &[Arc<Package>], image: &Image) -> Vec<Arc<Package>> {
  let mut deps = Vec::new();
  for package in packages {
    for name in image.required_packages() {
      if package.provides(name) {
        deps.push(Arc::clone(package));
      }
    }
  }
  deps
}

/// Images whose content set requires the package.
pub fn dependants_of(images: &[Arc<Image>], package: &Package, mode: DependantMatch) -> Vec<Arc<Image>> {
  images
    .iter()
    .filter(|image| {
      image.required_packages().iter().any(|name| match mode {
        DependantMatch::Primary => name == package.name(),
        DependantMatch::Aliases => package.provides(name),
      })
    })
    .map(Arc::clone)
    .collect()
}

/// Identity lookup by configuration file path.
pub fn find(
  packages: &[Arc<Package>],
  images: &[Arc<Image>],
  source: &Path,
) -> (Option<Arc<Package>>, Option<Arc<Image>>) {
  if let Some(package) = packages.iter().find(|p| p.source() == source) {
    return (Some(Arc::clone(package)), None);
  }
  if let Some(image) = images.iter().find(|i| i.source() == source) {
    return (None, Some(Arc::clone(image)));
  }
  (None, None)
}
