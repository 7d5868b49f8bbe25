//! Implementation of the `kiln dev` command.
//!
//! Watches every artifact source and rebuilds the minimal affected set on
//! each change. Build failures are reported and watching continues; the
//! command returns when the watcher shuts down or Ctrl-C cancels.

use std::sync::Arc;

use anyhow::{Context, Result};

use kiln_lib::builder::Cancel;
use kiln_lib::watch;

use crate::output;
use crate::settings::{Settings, SettingsArgs, load_builder};

pub fn cmd_dev(args: &SettingsArgs) -> Result<()> {
  let settings = Settings::resolve(args)?;
  let builder = Arc::new(load_builder(&settings)?);

  output::print_info(&format!("watching {} artifact sources", builder.watch_paths().len()));

  let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  rt.block_on(async {
    let cancel = Cancel::new();
    tokio::select! {
      result = watch::watch(builder, cancel.clone()) => result.context("watch mode failed"),
      _ = tokio::signal::ctrl_c() => {
        cancel.cancel();
        output::print_info("interrupted, shutting down");
        Ok(())
      }
    }
  })
}
