//! Keeping caches and the search index in step with the content tree.
//!
//! Two independent consumers read their own [`ChangeStream`] from the content
//! watcher:
//!
//! - [`CacheInvalidator`] drops the rendered entry for the changed key and
//!   for its parent directory, whose listing is built from its children.
//! - [`IndexUpdater`] clears the search result cache and re-indexes the
//!   changed document.
//!
//! Each processes events one at a time in arrival order. There is no
//! ordering between the two.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::{ContentCache, SearchCache};
use crate::content::{ContentKind, ContentLoader, is_document};
use crate::paths::{NormalizedPath, PathNormalizer};
use crate::privacy::PrivacyFilter;
use crate::search::{FullTextIndex, SearchError};
use crate::watcher::ChangeStream;

pub struct CacheInvalidator {
    cache: Arc<ContentCache>,
    normalizer: PathNormalizer,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<ContentCache>, normalizer: PathNormalizer) -> Self {
        Self { cache, normalizer }
    }

    /// Remove the entries for a changed storage path and its directory.
    pub fn invalidate(&self, path: &Path) -> NormalizedPath {
        let key = self.normalizer.from_storage(path);
        let parent = key.parent();
        self.cache.remove(key.as_str());
        self.cache.remove(parent.as_str());
        crate::log_event!("cache", "invalidated", "{key} (and {parent})");
        key
    }

    /// Consume change events until the stream ends or `cancel` fires.
    pub async fn run(self, mut events: ChangeStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::debug_event!("cache", "invalidator stopped");
                    break;
                }
                event = events.recv() => match event {
                    Some(path) => {
                        self.invalidate(&path);
                    }
                    None => {
                        crate::debug_event!("cache", "invalidator stream closed");
                        break;
                    }
                },
            }
        }
    }
}

/// What happened to the index for one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    Removed,
    Ignored,
}

pub struct IndexUpdater {
    loader: Arc<dyn ContentLoader>,
    privacy: Arc<PrivacyFilter>,
    index: Arc<FullTextIndex>,
    search_cache: Arc<SearchCache>,
    normalizer: PathNormalizer,
}

impl IndexUpdater {
    pub fn new(
        loader: Arc<dyn ContentLoader>,
        privacy: Arc<PrivacyFilter>,
        index: Arc<FullTextIndex>,
        search_cache: Arc<SearchCache>,
        normalizer: PathNormalizer,
    ) -> Self {
        Self {
            loader,
            privacy,
            index,
            search_cache,
            normalizer,
        }
    }

    fn stage(&self, path: &Path) -> Result<IndexOutcome, SearchError> {
        if !is_document(path) {
            return Ok(IndexOutcome::Ignored);
        }
        let key = self.normalizer.from_storage(path);
        if self.privacy.is_private(&key) {
            self.index.remove(path);
            return Ok(IndexOutcome::Removed);
        }
        match self.loader.load(&key) {
            Ok(item) if item.kind == ContentKind::Document => {
                let text = item.text.as_deref().unwrap_or_default();
                self.index.upsert(path, &item.title, text)?;
                Ok(IndexOutcome::Indexed)
            }
            _ => {
                self.index.remove(path);
                Ok(IndexOutcome::Removed)
            }
        }
    }

    /// Index every public document among `paths`. Returns the number indexed.
    pub fn build_initial(&self, paths: &[PathBuf]) -> Result<usize, SearchError> {
        let mut indexed = 0;
        for path in paths {
            if self.stage(path)? == IndexOutcome::Indexed {
                indexed += 1;
            }
        }
        self.index.commit()?;
        crate::log_event!("index", "built", "{indexed} documents");
        Ok(indexed)
    }

    /// Apply one change event.
    ///
    /// Cached search results are dropped first, whatever the change was.
    pub fn apply(&self, path: &Path) -> Result<IndexOutcome, SearchError> {
        self.search_cache.remove_all();
        let outcome = self.stage(path)?;
        if outcome != IndexOutcome::Ignored {
            self.index.commit()?;
            crate::debug_event!("index", "updated", "{} ({outcome:?})", path.display());
        }
        Ok(outcome)
    }

    /// Build the initial index, then consume change events until the stream
    /// ends or `cancel` fires.
    pub async fn run(
        self: Arc<Self>,
        initial: Vec<PathBuf>,
        mut events: ChangeStream,
        cancel: CancellationToken,
    ) {
        let builder = Arc::clone(&self);
        match tokio::task::spawn_blocking(move || builder.build_initial(&initial)).await {
            Ok(Err(e)) => tracing::error!("[index] initial build failed: {e}"),
            Err(e) => tracing::error!("[index] initial build task failed: {e}"),
            Ok(Ok(_)) => {}
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::debug_event!("index", "updater stopped");
                    break;
                }
                event = events.recv() => {
                    let Some(path) = event else {
                        crate::debug_event!("index", "updater stream closed");
                        break;
                    };
                    let updater = Arc::clone(&self);
                    let applied = tokio::task::spawn_blocking(move || {
                        let result = updater.apply(&path);
                        (path, result)
                    })
                    .await;
                    match applied {
                        Ok((path, Err(e))) => {
                            tracing::warn!("[index] update failed for {}: {e}", path.display())
                        }
                        Err(e) => tracing::warn!("[index] update task failed: {e}"),
                        Ok((_, Ok(_))) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivacyConfig;
    use crate::content::{ContentItem, FsLoader};
    use bytes::Bytes;
    use std::fs;
    use tempfile::TempDir;

    fn item() -> Arc<ContentItem> {
        Arc::new(ContentItem {
            path: PathBuf::new(),
            kind: ContentKind::Document,
            title: String::new(),
            text: None,
            body: Bytes::from_static(b"x"),
        })
    }

    #[test]
    fn test_invalidate_removes_key_and_parent() {
        let cache = Arc::new(ContentCache::new("content", 16));
        for key in [".", "intro", "notes", "notes/a", "notes/b"] {
            cache.set(key, item());
        }
        let invalidator = CacheInvalidator::new(
            Arc::clone(&cache),
            PathNormalizer::new("/blog", Path::new("/srv/content")),
        );

        invalidator.invalidate(Path::new("/srv/content/notes/a.md"));
        assert!(!cache.contains("notes/a"));
        assert!(!cache.contains("notes"));
        assert!(cache.contains("notes/b"));
        assert!(cache.contains("."));

        invalidator.invalidate(Path::new("/srv/content/intro.md"));
        assert!(!cache.contains("intro"));
        assert!(!cache.contains("."));
    }

    #[tokio::test]
    async fn test_invalidator_stops_on_cancel() {
        let cache = Arc::new(ContentCache::new("content", 4));
        let invalidator = CacheInvalidator::new(
            Arc::clone(&cache),
            PathNormalizer::new("/blog", Path::new("/srv/content")),
        );
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(invalidator.run(rx, cancel.clone()));

        cache.set("intro", item());
        tx.send(PathBuf::from("/srv/content/intro.md")).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!cache.contains("intro"));

        cancel.cancel();
        task.await.unwrap();
    }

    struct Fixture {
        dir: TempDir,
        index: Arc<FullTextIndex>,
        search_cache: Arc<SearchCache>,
        updater: IndexUpdater,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("intro.md"), "# Intro\nferris crab\n").unwrap();
        fs::write(dir.path().join("private.md"), "ferris secret\n").unwrap();
        fs::write(dir.path().join("logo.png"), "ferris").unwrap();

        let normalizer = PathNormalizer::new("/blog", dir.path());
        let privacy = Arc::new(
            PrivacyFilter::from_config(&PrivacyConfig {
                hide: vec![],
                private: vec!["private.md".into()],
            })
            .unwrap(),
        );
        let loader = Arc::new(FsLoader::new(dir.path(), normalizer.clone()));
        let index = Arc::new(FullTextIndex::in_memory().unwrap());
        let search_cache = Arc::new(SearchCache::new("search", 8));
        let updater = IndexUpdater::new(
            loader,
            privacy,
            Arc::clone(&index),
            Arc::clone(&search_cache),
            normalizer,
        );
        Fixture {
            dir,
            index,
            search_cache,
            updater,
        }
    }

    #[test]
    fn test_initial_build_skips_private_and_assets() {
        let f = fixture();
        let paths: Vec<PathBuf> = ["intro.md", "private.md", "logo.png"]
            .iter()
            .map(|p| f.dir.path().join(p))
            .collect();
        assert_eq!(f.updater.build_initial(&paths).unwrap(), 1);
        assert_eq!(f.index.num_docs(), 1);
    }

    #[test]
    fn test_apply_tracks_edits_and_deletes() {
        let f = fixture();
        let intro = f.dir.path().join("intro.md");
        f.updater.build_initial(std::slice::from_ref(&intro)).unwrap();
        f.search_cache.set("stale", Arc::new(vec!["/blog/x".to_string()]));

        fs::write(&intro, "# Intro\nrewritten\n").unwrap();
        assert_eq!(f.updater.apply(&intro).unwrap(), IndexOutcome::Indexed);
        assert!(f.search_cache.is_empty());
        assert_eq!(f.index.num_docs(), 1);

        fs::remove_file(&intro).unwrap();
        assert_eq!(f.updater.apply(&intro).unwrap(), IndexOutcome::Removed);
        assert_eq!(f.index.num_docs(), 0);
    }

    #[test]
    fn test_apply_ignores_assets_but_clears_results() {
        let f = fixture();
        f.search_cache.set("stale", Arc::new(Vec::new()));
        let outcome = f.updater.apply(&f.dir.path().join("logo.png")).unwrap();
        assert_eq!(outcome, IndexOutcome::Ignored);
        assert!(f.search_cache.is_empty());
    }
}
