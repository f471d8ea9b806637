//! Wiring of the live objects shared by handlers and background tasks.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::cache::{ContentCache, SearchCache};
use crate::coherence::{CacheInvalidator, IndexUpdater};
use crate::config::{ConfigError, ConfigSnapshot, LiveConfig, Overrides, Settings};
use crate::content::{ContentLoader, FsLoader};
use crate::error::ServeError;
use crate::limiter::RateLimiter;
use crate::paths::PathNormalizer;
use crate::pipeline::{ContentResponse, Pipeline, RequestContext};
use crate::privacy::PrivacyFilter;
use crate::reload::ConfigReloader;
use crate::search::{
    ContentSearcher, Corpus, FullTextIndex, KeywordSearcher, SearchDispatcher, SearchError,
    Searcher, SearcherInfo, SearcherRegistry, TitleSearcher,
};
use crate::watcher::{FileWatcher, WatchError};

/// How often idle identities are dropped from the limiter.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("Content root {} is not usable: {source}", path.display())]
    ContentRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Content root {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },
}

pub struct App {
    live: Arc<LiveConfig>,
    overrides: Overrides,
    content_root: PathBuf,
    normalizer: PathNormalizer,
    limiter: Arc<RateLimiter>,
    privacy: Arc<PrivacyFilter>,
    content_cache: Arc<ContentCache>,
    search_cache: Arc<SearchCache>,
    loader: Arc<dyn ContentLoader>,
    index: Arc<FullTextIndex>,
    dispatcher: SearchDispatcher,
    pipeline: Pipeline,
    cancel: CancellationToken,
    watchers: Mutex<Vec<FileWatcher>>,
}

impl App {
    /// Build every live object from the startup settings. Nothing is watched
    /// until [`start`](Self::start).
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        Self::with_overrides(settings, Overrides::default())
    }

    /// Like [`new`](Self::new), with command-line overrides that are applied
    /// now and re-applied on every config reload.
    pub fn with_overrides(mut settings: Settings, overrides: Overrides) -> Result<Self, AppError> {
        overrides.apply(&mut settings);
        settings.validate()?;

        let root = &settings.content.root;
        let content_root = root.canonicalize().map_err(|source| AppError::ContentRoot {
            path: root.clone(),
            source,
        })?;
        if !content_root.is_dir() {
            return Err(AppError::NotADirectory { path: content_root });
        }

        let privacy = Arc::new(PrivacyFilter::from_config(&settings.privacy)?);
        let normalizer = PathNormalizer::from_settings(&settings, &content_root);
        let content_cache = Arc::new(ContentCache::new("content", settings.content.cache_capacity));
        let search_cache = Arc::new(SearchCache::new(
            "search",
            settings.search.result_cache_capacity,
        ));
        let loader: Arc<dyn ContentLoader> = Arc::new(
            FsLoader::new(&content_root, normalizer.clone()).with_privacy(Arc::clone(&privacy)),
        );
        let index = Arc::new(FullTextIndex::in_memory()?);

        let registry = Arc::new(SearcherRegistry::new());
        let corpus = Corpus::new(&content_root, normalizer.clone(), Arc::clone(&privacy));
        registry.register(Arc::new(TitleSearcher::new(corpus.clone())));
        registry.register(Arc::new(ContentSearcher::new(corpus.clone())));
        registry.register(Arc::new(KeywordSearcher::new(corpus)));
        registry.register(Arc::clone(&index) as Arc<dyn Searcher>);
        registry.apply_plugins(&settings.search.plugins, &content_root);

        let dispatcher = SearchDispatcher::new(
            registry,
            Arc::clone(&search_cache),
            Arc::clone(&privacy),
        );

        let live = Arc::new(LiveConfig::new(settings));
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&live)));
        let pipeline = Pipeline::standard(
            Arc::clone(&privacy),
            Arc::clone(&content_cache),
            Arc::clone(&live),
            Arc::clone(&loader),
            normalizer.route_prefix(),
        );

        crate::log_event!("app", "content root", "{}", content_root.display());

        Ok(Self {
            live,
            overrides,
            content_root,
            normalizer,
            limiter,
            privacy,
            content_cache,
            search_cache,
            loader,
            index,
            dispatcher,
            pipeline,
            cancel: CancellationToken::new(),
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Start watching content (and the config file, if given) and spawn the
    /// background consumers. Must be called inside a tokio runtime.
    pub fn start(&self, config_path: Option<&Path>) -> Result<(), AppError> {
        let content = FileWatcher::watch_tree(&self.content_root)?;
        let invalidations = content.subscribe()?;
        let index_events = content.subscribe()?;
        let initial = content.all_paths();

        tokio::spawn(
            self.invalidator()
                .run(invalidations, self.cancel.child_token()),
        );
        tokio::spawn(Arc::new(self.index_updater()).run(
            initial,
            index_events,
            self.cancel.child_token(),
        ));

        let mut watchers = vec![content];

        if let Some(path) = config_path {
            let config = FileWatcher::watch_file(path)?;
            let events = config.subscribe()?;
            tokio::spawn(self.reloader(path).run(events, self.cancel.child_token()));
            watchers.push(config);
        }

        self.spawn_sweeper();
        self.watchers.lock().extend(watchers);
        crate::log_event!("app", "started");
        Ok(())
    }

    fn spawn_sweeper(&self) {
        let cancel = self.cancel.child_token();
        let limiter = Arc::clone(&self.limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => limiter.sweep(),
                }
            }
        });
    }

    /// Cancel background tasks and stop watching.
    pub fn stop(&self) {
        self.cancel.cancel();
        let watchers: Vec<FileWatcher> = self.watchers.lock().drain(..).collect();
        for watcher in &watchers {
            watcher.stop();
        }
        crate::log_event!("app", "stopped");
    }

    pub fn settings(&self) -> Arc<ConfigSnapshot> {
        self.live.snapshot()
    }

    pub fn live_config(&self) -> &Arc<LiveConfig> {
        &self.live
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    pub fn content_cache(&self) -> &Arc<ContentCache> {
        &self.content_cache
    }

    pub fn search_cache(&self) -> &Arc<SearchCache> {
        &self.search_cache
    }

    pub fn privacy(&self) -> &Arc<PrivacyFilter> {
        &self.privacy
    }

    pub fn registry(&self) -> &Arc<SearcherRegistry> {
        self.dispatcher.registry()
    }

    /// Admit or deny a request from a client identity.
    pub fn admit(&self, identity: &str) -> Result<(), ServeError> {
        self.limiter.admit(identity)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Serve a routed content URL through the pipeline.
    pub async fn handle_content(&self, route: &str) -> Result<ContentResponse, ServeError> {
        let ctx = RequestContext::new(route, self.normalizer.normalize(route));
        self.pipeline.handle(&ctx).await
    }

    pub async fn search(
        &self,
        query: &str,
        strategy: &str,
        limit: usize,
    ) -> Result<Arc<Vec<String>>, ServeError> {
        self.dispatcher
            .search(query, strategy, limit, &self.normalizer)
            .await
    }

    pub fn strategies(&self) -> Vec<SearcherInfo> {
        self.dispatcher.list_strategies()
    }

    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator::new(Arc::clone(&self.content_cache), self.normalizer.clone())
    }

    pub fn index_updater(&self) -> IndexUpdater {
        IndexUpdater::new(
            Arc::clone(&self.loader),
            Arc::clone(&self.privacy),
            Arc::clone(&self.index),
            Arc::clone(&self.search_cache),
            self.normalizer.clone(),
        )
    }

    pub fn reloader(&self, config_path: &Path) -> ConfigReloader {
        ConfigReloader::new(
            config_path,
            &self.content_root,
            Arc::clone(&self.live),
            Arc::clone(&self.privacy),
            Arc::clone(self.dispatcher.registry()),
            Arc::clone(&self.search_cache),
        )
        .with_overrides(self.overrides)
    }

    /// Index the current content tree without starting watchers.
    pub fn build_index(&self) -> Result<usize, SearchError> {
        let paths: Vec<PathBuf> = WalkDir::new(&self.content_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        self.index_updater().build_initial(&paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings_for(root: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.content.root = root.to_path_buf();
        settings
    }

    #[test]
    fn test_missing_content_root() {
        let settings = settings_for(Path::new("/definitely/not/here"));
        assert!(matches!(App::new(settings), Err(AppError::ContentRoot { .. })));
    }

    #[test]
    fn test_file_as_content_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.md");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            App::new(settings_for(&file)),
            Err(AppError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_builtin_strategies_registered() {
        let dir = TempDir::new().unwrap();
        let app = App::new(settings_for(dir.path())).unwrap();
        let names: Vec<String> = app.strategies().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["content", "fulltext", "keyword", "title"]);
    }

    #[tokio::test]
    async fn test_fulltext_after_build_index() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("intro.md"), "# Intro\nferris the crab\n").unwrap();
        fs::write(dir.path().join("private.md"), "ferris secrets\n").unwrap();

        let app = App::new(settings_for(dir.path())).unwrap();
        assert_eq!(app.build_index().unwrap(), 1);

        let routes = app.search("ferris", "fulltext", 10).await.unwrap();
        assert_eq!(*routes, vec!["/blog/intro.md"]);
    }

    #[test]
    fn test_overrides_survive_reload() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("blog")).unwrap();
        let config = dir.path().join("yb.toml");
        fs::write(&config, "[rate_limit]\nper_second = 5\n").unwrap();

        let overrides = Overrides {
            port: Some(9999),
            snapshot: true,
        };
        let app = App::with_overrides(Settings::load_from(&config).unwrap(), overrides).unwrap();
        assert_eq!(app.settings().server.port, 9999);

        fs::write(&config, "[rate_limit]\nper_second = 7\n").unwrap();
        app.reloader(&config).apply().unwrap();

        let settings = app.settings();
        assert_eq!(settings.rate_limit.per_second, 7);
        assert_eq!(settings.server.port, 9999);
        assert!(settings.snapshot.enabled);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let app = App::new(settings_for(dir.path())).unwrap();
        app.start(None).unwrap();
        app.stop();
        assert!(app.cancel.is_cancelled());
        assert!(app.watchers.lock().is_empty());
    }
}
