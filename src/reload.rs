//! Configuration hot reload.
//!
//! On every change to the config file the whole file is parsed again. A
//! successful parse is committed in one step: the new snapshot and the
//! privacy lists change under the same write lock, then plugin strategies are
//! synced and cached search results dropped. A failed parse leaves the
//! running configuration untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::SearchCache;
use crate::config::{ConfigError, LiveConfig, Overrides, Settings};
use crate::error::ServeError;
use crate::privacy::{PrivacyFilter, PrivacySets};
use crate::search::SearcherRegistry;
use crate::watcher::ChangeStream;

/// Quiet period to let editors finish writing before re-reading.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

pub struct ConfigReloader {
    path: PathBuf,
    content_root: PathBuf,
    live: Arc<LiveConfig>,
    privacy: Arc<PrivacyFilter>,
    registry: Arc<SearcherRegistry>,
    search_cache: Arc<SearchCache>,
    overrides: Overrides,
}

impl ConfigReloader {
    pub fn new(
        path: impl Into<PathBuf>,
        content_root: impl Into<PathBuf>,
        live: Arc<LiveConfig>,
        privacy: Arc<PrivacyFilter>,
        registry: Arc<SearcherRegistry>,
        search_cache: Arc<SearchCache>,
    ) -> Self {
        Self {
            path: path.into(),
            content_root: content_root.into(),
            live,
            privacy,
            registry,
            search_cache,
            overrides: Overrides::default(),
        }
    }

    /// Command-line overrides to re-apply on top of every reloaded file.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the config file, re-apply command-line overrides and commit.
    /// Returns the new version.
    pub fn apply(&self) -> Result<u64, ConfigError> {
        let mut settings = Settings::load_from(&self.path)?;
        self.overrides.apply(&mut settings);
        let sets = PrivacySets::compile(&settings.privacy)?;

        let previous = self.live.snapshot();
        if !previous.server.same_mount(&settings.server) {
            tracing::warn!(
                "[config] port or route prefixes changed; they apply after restart"
            );
        }
        if previous.content != settings.content {
            tracing::warn!("[config] content section changed; applies after restart");
        }

        let version = self
            .live
            .commit(settings, |_| self.privacy.install(sets));

        let current = self.live.snapshot();
        self.registry
            .apply_plugins(&current.search.plugins, &self.content_root);
        self.search_cache.remove_all();

        Ok(version)
    }

    /// Consume config change events until the stream ends or `cancel` fires.
    pub async fn run(self, mut events: ChangeStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::debug_event!("config", "reloader stopped");
                    break;
                }
                event = events.recv() => {
                    if event.is_none() {
                        crate::debug_event!("config", "reloader stream closed");
                        break;
                    }
                    tokio::time::sleep(SETTLE_DELAY).await;
                    while events.try_recv().is_ok() {}

                    match self.apply() {
                        Ok(version) => crate::log_event!("config", "update success", "version {version}"),
                        Err(e) => {
                            let err = ServeError::ConfigParse(e.to_string());
                            tracing::warn!("[config] update failed, keeping version {}: {err}", self.live.version());
                        }
                    }
                }
            }
        }
    }
}
