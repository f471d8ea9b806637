pub mod app;
pub mod cache;
pub mod cli;
pub mod coherence;
pub mod config;
pub mod content;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod privacy;
pub mod reload;
pub mod search;
pub mod server;
pub mod snapshot;
pub mod watcher;

pub use app::{App, AppError};
pub use cache::{BoundedCache, ContentCache, SearchCache};
pub use config::{ConfigSnapshot, LiveConfig, Settings};
pub use content::{ContentItem, ContentKind, ContentLoader, FsLoader};
pub use error::ServeError;
pub use paths::{NormalizedPath, PathNormalizer};
pub use pipeline::{ContentResponse, Pipeline, RequestContext};
pub use search::{SearchDispatcher, Searcher, SearcherRegistry};
