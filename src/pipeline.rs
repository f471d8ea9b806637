//! Request processing pipeline.
//!
//! A content request runs through a fixed chain of stages:
//!
//! ```text
//! privacy -> cache -> generation -> load
//! ```
//!
//! Each stage either answers the request or hands it to the rest of the
//! chain through [`Next`]. The generation stage is the only one that looks at
//! what the rest of the chain returned: it snapshots the response only when
//! the final result was a success.

use async_trait::async_trait;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::Arc;

use crate::cache::ContentCache;
use crate::config::LiveConfig;
use crate::content::{ContentKind, ContentLoader};
use crate::error::ServeError;
use crate::paths::NormalizedPath;
use crate::privacy::PrivacyFilter;
use crate::snapshot::SnapshotGenerator;

/// A request as seen by the stages.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Routed URL as requested, e.g. `/blog/intro.md`.
    pub route: String,
    /// Normalized key, e.g. `intro`.
    pub key: NormalizedPath,
}

impl RequestContext {
    pub fn new(route: impl Into<String>, key: NormalizedPath) -> Self {
        Self {
            route: route.into(),
            key,
        }
    }
}

/// Where a response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Loader,
}

#[derive(Debug, Clone)]
pub struct ContentResponse {
    pub content_type: &'static str,
    pub kind: ContentKind,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl IntoResponse for ContentResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response()
    }
}

pub type StageResult = Result<ContentResponse, ServeError>;

/// One step of the request chain.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &RequestContext, next: Next<'_>) -> StageResult;
}

/// The stages after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    /// Run the rest of the chain. Running off the end is a not-found.
    pub async fn run(self, ctx: &RequestContext) -> StageResult {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.process(ctx, Next { stages: rest }).await,
            None => Err(ServeError::NotFound),
        }
    }
}

/// The ordered stage chain.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The standard chain: privacy, cache, generation, load.
    ///
    /// `route_prefix` is the prefix content routes are mounted under.
    pub fn standard(
        privacy: Arc<PrivacyFilter>,
        cache: Arc<ContentCache>,
        config: Arc<LiveConfig>,
        loader: Arc<dyn ContentLoader>,
        route_prefix: &str,
    ) -> Self {
        Self::new(vec![
            Arc::new(PrivacyStage { privacy }),
            Arc::new(CacheStage {
                cache: Arc::clone(&cache),
            }),
            Arc::new(GenerationStage {
                config,
                generator: SnapshotGenerator::new(Arc::clone(&cache), route_prefix),
            }),
            Arc::new(LoadStage { loader, cache }),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn handle(&self, ctx: &RequestContext) -> StageResult {
        Next {
            stages: &self.stages,
        }
        .run(ctx)
        .await
    }
}

/// Response content type from the requested route's suffix.
pub fn content_type(route: &str) -> &'static str {
    let name = route.rsplit('/').next().unwrap_or(route);
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "text/html; charset=utf-8",
    };
    match ext.as_str() {
        "png" => "image/png",
        "jpg" => "image/jpg",
        "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "css" => "text/css; charset=utf-8",
        _ => "text/html; charset=utf-8",
    }
}

/// Rejects hidden and private keys before anything is cached or generated.
pub struct PrivacyStage {
    privacy: Arc<PrivacyFilter>,
}

#[async_trait]
impl Stage for PrivacyStage {
    fn name(&self) -> &'static str {
        "privacy"
    }

    async fn process(&self, ctx: &RequestContext, next: Next<'_>) -> StageResult {
        if let Some(set) = self.privacy.matched_set(&ctx.key) {
            crate::debug_event!("privacy", "blocked", "{} ({set})", ctx.key);
            return Err(ServeError::NotFound);
        }
        next.run(ctx).await
    }
}

pub struct CacheStage {
    cache: Arc<ContentCache>,
}

#[async_trait]
impl Stage for CacheStage {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn process(&self, ctx: &RequestContext, next: Next<'_>) -> StageResult {
        match self.cache.get(ctx.key.as_str()) {
            Some(item) => {
                crate::log_event!("cache", "hit", "{}", ctx.key);
                Ok(ContentResponse {
                    content_type: content_type(&ctx.route),
                    kind: item.kind,
                    body: item.body.clone(),
                    source: ResponseSource::Cache,
                })
            }
            None => {
                crate::log_event!("cache", "miss", "{}", ctx.key);
                next.run(ctx).await
            }
        }
    }
}

/// Writes a static copy of each successfully rendered response.
pub struct GenerationStage {
    config: Arc<LiveConfig>,
    generator: SnapshotGenerator,
}

#[async_trait]
impl Stage for GenerationStage {
    fn name(&self) -> &'static str {
        "generation"
    }

    async fn process(&self, ctx: &RequestContext, next: Next<'_>) -> StageResult {
        let settings = self.config.snapshot();
        if !settings.snapshot.enabled {
            return next.run(ctx).await;
        }

        let result = next.run(ctx).await;
        if result.is_ok() {
            match self.generator.generate(ctx, &settings).await {
                Ok(path) => crate::log_event!("gen", "wrote", "{}", path.display()),
                Err(e) => {
                    let err = ServeError::from(e);
                    tracing::error!("[gen] {err}");
                }
            }
        }
        result
    }
}

pub struct LoadStage {
    loader: Arc<dyn ContentLoader>,
    cache: Arc<ContentCache>,
}

#[async_trait]
impl Stage for LoadStage {
    fn name(&self) -> &'static str {
        "load"
    }

    async fn process(&self, ctx: &RequestContext, _next: Next<'_>) -> StageResult {
        let loader = Arc::clone(&self.loader);
        let key = ctx.key.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&key))
            .await
            .map_err(|e| {
                tracing::error!("[load] task failed for {}: {e}", ctx.key);
                ServeError::NotFound
            })?;

        match loaded {
            Ok(item) => {
                let item = Arc::new(item);
                self.cache.set(ctx.key.as_str(), Arc::clone(&item));
                crate::debug_event!("load", "rendered", "{}", ctx.key);
                Ok(ContentResponse {
                    content_type: content_type(&ctx.route),
                    kind: item.kind,
                    body: item.body.clone(),
                    source: ResponseSource::Loader,
                })
            }
            Err(e) => {
                crate::debug_event!("load", "failed", "{}: {e}", ctx.key);
                Err(ServeError::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PrivacyConfig, Settings};
    use crate::content::{ContentItem, LoadError};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loader that serves every key except `missing` and counts calls.
    struct CountingLoader {
        calls: AtomicUsize,
    }

    impl ContentLoader for CountingLoader {
        fn url_to_path(&self, key: &NormalizedPath) -> PathBuf {
            PathBuf::from(key.as_str())
        }

        fn load(&self, key: &NormalizedPath) -> Result<ContentItem, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.as_str() == "missing" {
                return Err(LoadError::NotFound {
                    key: key.to_string(),
                });
            }
            Ok(ContentItem {
                path: PathBuf::from(key.as_str()),
                kind: ContentKind::Document,
                title: key.to_string(),
                text: None,
                body: Bytes::from(format!("<p>{key}</p>")),
            })
        }
    }

    struct Harness {
        loader: Arc<CountingLoader>,
        cache: Arc<ContentCache>,
        pipeline: Pipeline,
    }

    fn harness() -> Harness {
        let settings = Settings::default();
        let privacy = Arc::new(PrivacyFilter::from_config(&PrivacyConfig {
            hide: vec![],
            private: vec!["private.md".into()],
        })
        .unwrap());
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ContentCache::new("content", 16));
        let pipeline = Pipeline::standard(
            privacy,
            Arc::clone(&cache),
            Arc::new(LiveConfig::new(settings)),
            loader.clone(),
            "/blog",
        );
        Harness {
            loader,
            cache,
            pipeline,
        }
    }

    fn ctx(route: &str, key: &str) -> RequestContext {
        RequestContext::new(route, NormalizedPath::new(key))
    }

    #[test]
    fn test_stage_order() {
        let h = harness();
        assert_eq!(
            h.pipeline.stage_names(),
            vec!["privacy", "cache", "generation", "load"]
        );
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let h = harness();
        let first = h.pipeline.handle(&ctx("/blog/intro", "intro")).await.unwrap();
        assert_eq!(first.source, ResponseSource::Loader);
        assert!(h.cache.contains("intro"));

        let second = h.pipeline.handle(&ctx("/blog/intro", "intro")).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(first.body, second.body);
        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_private_key_never_reaches_cache_or_loader() {
        let h = harness();
        let err = h
            .pipeline
            .handle(&ctx("/blog/private", "private"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServeError::NotFound));
        assert!(!h.cache.contains("private"));
        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_load_failure_is_not_found_and_uncached() {
        let h = harness();
        let err = h
            .pipeline
            .handle(&ctx("/blog/missing", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServeError::NotFound));
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain_is_not_found() {
        let pipeline = Pipeline::new(Vec::new());
        let err = pipeline.handle(&ctx("/blog/x", "x")).await.unwrap_err();
        assert!(matches!(err, ServeError::NotFound));
    }

    #[test]
    fn test_content_type_from_suffix() {
        assert_eq!(content_type("/blog/img/logo.PNG"), "image/png");
        assert_eq!(content_type("/blog/a.jpeg"), "image/jpeg");
        assert_eq!(content_type("/blog/style.css"), "text/css; charset=utf-8");
        assert_eq!(content_type("/blog/intro"), "text/html; charset=utf-8");
        assert_eq!(content_type("/blog/intro.md"), "text/html; charset=utf-8");
        assert_eq!(content_type("/blog/v1.2/intro"), "text/html; charset=utf-8");
    }
}
