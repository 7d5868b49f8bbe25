//! Filesystem-triggered rebuilds for dev mode.
//!
//! Every artifact's source file is registered with the platform watcher.
//! A write to a package recipe rebuilds its dependant images (the package
//! itself rebuilds as a side effect of their dependency step); a write to
//! an image config rebuilds just that image. Build failures are logged and
//! never stop the loop; only channel closure or cancellation does.

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::builder::{Builder, Cancel};

/// Errors raised while setting up watch mode.
#[derive(Debug, Error)]
pub enum WatchError {
  /// The watcher could not be created or a path could not be registered.
  #[error("filesystem watcher error: {0}")]
  Watcher(#[from] notify::Error),
}

/// Watch every artifact source and rebuild on changes, until the watcher
/// shuts down or `cancel` fires.
pub async fn watch(builder: Arc<Builder>, cancel: Cancel) -> Result<(), WatchError> {
  let (tx, rx) = mpsc::unbounded_channel();

  let mut watcher = notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
    let _ = tx.send(event);
  })?;

  let paths = builder.watch_paths();
  for path in &paths {
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    debug!(path = %path.display(), "watching");
  }
  info!(paths = paths.len(), "watch mode started");

  run_loop(builder, rx, cancel).await;
  Ok(())
}

/// Drain the event stream, dispatching rebuilds for modify events.
async fn run_loop(
  builder: Arc<Builder>,
  mut events: mpsc::UnboundedReceiver<Result<Event, notify::Error>>,
  cancel: Cancel,
) {
  while let Some(event) = events.recv().await {
    if cancel.is_cancelled() {
      info!("cancellation requested, stopping watch");
      return;
    }
    match event {
      Ok(event) => {
        if !matches!(event.kind, EventKind::Modify(_)) {
          continue;
        }
        for path in &event.paths {
          debug!(path = %path.display(), "source modified");
          dispatch_write(&builder, path, &cancel);
        }
      }
      Err(err) => warn!(error = %err, "filesystem watcher error"),
    }
  }

  info!("watch channel closed, stopping");
}

/// Map a modified path to its artifact and start the minimal rebuild.
/// Once `cancel` fires, no new work is dispatched.
///
/// Returned handles are fire-and-forget for the watch loop; tests await
/// them for determinism.
pub fn dispatch_write(builder: &Arc<Builder>, path: &Path, cancel: &Cancel) -> Vec<JoinHandle<()>> {
  let mut handles = Vec::new();
  if cancel.is_cancelled() {
    return handles;
  }
  let (package, image) = builder.find(path);

  if let Some(package) = package {
    let dependants = builder.dependants_of(&package);
    if dependants.is_empty() {
      info!(package = %package.name(), "rebuilding package");
      handles.push(tokio::spawn(async move {
        if let Err(err) = package.build().await {
          error!(package = %package.name(), error = %err, "package build failed");
        }
      }));
    } else {
      for dependant in dependants {
        info!(
          image = %dependant.reference(),
          package = %package.name(),
          "rebuilding dependant image"
        );
        let builder = Arc::clone(builder);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
          if let Err(err) = builder.build_image_with_deps(&dependant, &cancel).await {
            error!(image = %dependant.reference(), error = %err, "image build failed");
          }
        }));
      }
    }
  }

  if let Some(image) = image {
    info!(image = %image.reference(), "rebuilding image");
    handles.push(tokio::spawn(async move {
      if let Err(err) = image.build().await {
        error!(image = %image.reference(), error = %err, "image build failed");
      }
    }));
  }

  handles
}
