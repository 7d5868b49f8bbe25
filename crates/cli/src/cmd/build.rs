//! Implementation of the `kiln build` command.
//!
//! Builds every package first (parallel, bounded), regenerates the package
//! indexes, then builds every image. Exits non-zero on any failure. Ctrl-C
//! stops new builds from starting; in-flight work runs to completion.

use anyhow::{Context, Result};

use kiln_lib::builder::Cancel;

use crate::output;
use crate::settings::{Settings, SettingsArgs, load_builder};

pub fn cmd_build(args: &SettingsArgs) -> Result<()> {
  let settings = Settings::resolve(args)?;
  let builder = load_builder(&settings)?;

  let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  let summary = rt
    .block_on(async {
      let cancel = Cancel::new();
      let signal_cancel = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          output::print_info("interrupt received, finishing in-flight builds");
          signal_cancel.cancel();
        }
      });

      builder.build_all(&cancel).await
    })
    .context("build failed")?;

  output::print_success("Build complete");
  println!("  Packages built: {}", summary.packages_built);
  println!("  Packages fresh: {}", summary.packages_fresh);
  println!("  Images built:   {}", summary.images_built);
  println!("  Images fresh:   {}", summary.images_fresh);

  Ok(())
}
