//! Serve command - HTTP server with watchers and hot reload.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::app::App;
use crate::config::{Overrides, Settings};
use crate::server;

/// Run the serve command.
///
/// The config file is watched for changes only when it exists at startup.
/// `overrides` stay in force across reloads.
pub async fn run(overrides: Overrides, settings: Settings, config_path: &Path) -> anyhow::Result<()> {
    let app = Arc::new(App::with_overrides(settings, overrides).context("Failed to initialize")?);
    let watched = config_path.is_file().then_some(config_path);
    if watched.is_none() {
        crate::log_event!(
            "config",
            "not watched",
            "{} does not exist, using defaults",
            config_path.display()
        );
    }
    app.start(watched).context("Failed to start watchers")?;

    server::serve(app).await
}
