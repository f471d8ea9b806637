//! Pluggable search.
//!
//! Strategies implement [`Searcher`] and live in a [`SearcherRegistry`] keyed
//! by name. The [`SearchDispatcher`] validates a request, runs the named
//! strategy, turns the storage paths it returns into routes and drops
//! anything private. Results are cached per `(strategy, limit, query)` and the
//! whole result cache is cleared whenever content or configuration changes.

mod fulltext;
mod plugin;
mod strategies;

pub use fulltext::FullTextIndex;
pub use plugin::PluginSearcher;
pub use strategies::{ContentSearcher, Corpus, KeywordSearcher, TitleSearcher};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::cache::SearchCache;
use crate::config::PluginConfig;
use crate::error::ServeError;
use crate::paths::PathNormalizer;
use crate::privacy::PrivacyFilter;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Plugin '{name}' failed: {reason}")]
    Plugin { name: String, reason: String },
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::Index(err.to_string())
    }
}

/// A named search strategy.
#[async_trait]
pub trait Searcher: Send + Sync {
    fn name(&self) -> &str;

    /// One-line description for `/searchers`.
    fn brief(&self) -> &str;

    /// Storage paths of the best matches, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PathBuf>, SearchError>;
}

/// Entry in the strategy listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearcherInfo {
    #[serde(rename = "type")]
    pub name: String,
    pub brief: String,
}

/// Concurrent name to strategy map.
#[derive(Default)]
pub struct SearcherRegistry {
    searchers: DashMap<String, Arc<dyn Searcher>>,
    plugin_names: Mutex<HashSet<String>>,
}

impl SearcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, searcher: Arc<dyn Searcher>) {
        crate::debug_event!("search", "registered", "{}", searcher.name());
        self.searchers.insert(searcher.name().to_string(), searcher);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.searchers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Searcher>> {
        self.searchers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.searchers.contains_key(name)
    }

    /// All strategies, sorted by name.
    pub fn list(&self) -> Vec<SearcherInfo> {
        let mut infos: Vec<SearcherInfo> = self
            .searchers
            .iter()
            .map(|entry| SearcherInfo {
                name: entry.key().clone(),
                brief: entry.value().brief().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Bring plugin registrations in line with configuration.
    ///
    /// Plugins no longer declared are removed. A `disable` entry removes the
    /// strategy of that name, built-in or not.
    pub fn apply_plugins(&self, plugins: &[PluginConfig], content_root: &Path) {
        let mut registered = self.plugin_names.lock();

        let declared: HashSet<&str> = plugins
            .iter()
            .filter(|p| !p.disable)
            .map(|p| p.name.as_str())
            .collect();
        for stale in registered.iter().filter(|name| !declared.contains(name.as_str())) {
            self.searchers.remove(stale);
            crate::log_event!("search", "plugin removed", "{stale}");
        }
        registered.retain(|name| declared.contains(name.as_str()));

        for plugin in plugins {
            if plugin.disable {
                if self.remove(&plugin.name) {
                    crate::log_event!("search", "disabled", "{}", plugin.name);
                }
                continue;
            }
            self.register(Arc::new(PluginSearcher::new(plugin.clone(), content_root)));
            registered.insert(plugin.name.clone());
        }
    }
}

/// Validates, runs and translates search requests.
pub struct SearchDispatcher {
    registry: Arc<SearcherRegistry>,
    cache: Arc<SearchCache>,
    privacy: Arc<PrivacyFilter>,
}

impl SearchDispatcher {
    pub fn new(
        registry: Arc<SearcherRegistry>,
        cache: Arc<SearchCache>,
        privacy: Arc<PrivacyFilter>,
    ) -> Self {
        Self {
            registry,
            cache,
            privacy,
        }
    }

    pub fn registry(&self) -> &Arc<SearcherRegistry> {
        &self.registry
    }

    pub fn list_strategies(&self) -> Vec<SearcherInfo> {
        self.registry.list()
    }

    /// Routes matching `query` under the named strategy.
    pub async fn search(
        &self,
        query: &str,
        strategy: &str,
        limit: usize,
        normalizer: &PathNormalizer,
    ) -> Result<Arc<Vec<String>>, ServeError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ServeError::InvalidRequest("keyword is empty".to_string()));
        }
        let searcher = self
            .registry
            .get(strategy)
            .ok_or_else(|| ServeError::StrategyNotFound(strategy.to_string()))?;

        let cache_key = format!("{strategy}\u{0}{limit}\u{0}{query}");
        if let Some(routes) = self.cache.get(&cache_key) {
            crate::debug_event!("search", "cache hit", "{strategy}: {query}");
            return Ok(routes);
        }
        let generation = self.cache.generation();

        let paths = searcher
            .search(query, limit)
            .await
            .map_err(|e| ServeError::StrategyError(e.to_string()))?;

        let routes: Vec<String> = paths
            .iter()
            .filter_map(|path| normalizer.to_route(path))
            .filter(|route| !self.privacy.is_private(&normalizer.normalize(route)))
            .take(limit)
            .collect();

        crate::debug_event!(
            "search",
            "done",
            "{strategy}: {query} -> {} of {} results",
            routes.len(),
            paths.len()
        );

        let routes = Arc::new(routes);
        if !self
            .cache
            .set_if_generation(generation, cache_key, Arc::clone(&routes))
        {
            crate::debug_event!("search", "not cached", "content changed during {strategy}: {query}");
        }
        Ok(routes)
    }
}
