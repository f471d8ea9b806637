//! Static snapshot generation.
//!
//! When enabled, every route rendered for the first time is written under
//! the output directory so the tree can be served by a plain static host:
//!
//! ```text
//! /blog/           -> public/blog/index.html
//! /blog/notes/a.md -> public/blog/notes/a/index.html
//! /blog/logo.png   -> public/blog/logo.png
//! ```

use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::cache::ContentCache;
use crate::config::Settings;
use crate::content::ContentKind;
use crate::error::ServeError;
use crate::paths::{NormalizedPath, simplify, simplify_segments, strip_document_suffix};
use crate::pipeline::RequestContext;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("'{key}' is no longer cached")]
    NotCached { key: String },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<SnapshotError> for ServeError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::NotCached { key } => ServeError::StorageWrite {
                path: PathBuf::from(key),
                reason: "entry evicted before it could be written".to_string(),
            },
            SnapshotError::Write { path, source } => ServeError::StorageWrite {
                path,
                reason: source.to_string(),
            },
        }
    }
}

static LINK_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(href|src)="([^"]*)""#).expect("link pattern compiles"));

/// Writes cached renders to disk.
///
/// The route prefix is the one routes were mounted under at startup, so
/// written files and rewritten links match what the server answers.
pub struct SnapshotGenerator {
    cache: Arc<ContentCache>,
    route_prefix: String,
}

impl SnapshotGenerator {
    pub fn new(cache: Arc<ContentCache>, route_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            route_prefix: route_prefix.into(),
        }
    }

    /// Write the cached entry for `ctx`, returning the file written.
    pub async fn generate(
        &self,
        ctx: &RequestContext,
        settings: &Settings,
    ) -> Result<PathBuf, SnapshotError> {
        let item = self
            .cache
            .get(ctx.key.as_str())
            .ok_or_else(|| SnapshotError::NotCached {
                key: ctx.key.to_string(),
            })?;

        let prefix = &self.route_prefix;
        let destination = destination(&settings.snapshot.output_dir, prefix, &ctx.key, item.kind);

        let body = if item.kind.is_html() {
            let html = String::from_utf8_lossy(&item.body);
            let base = base_route(prefix, &ctx.key, item.kind);
            transform_links(&html, &base).into_bytes()
        } else {
            item.body.to_vec()
        };

        let write_err = |source| SnapshotError::Write {
            path: destination.clone(),
            source,
        };
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&destination, body).await.map_err(write_err)?;

        Ok(destination)
    }
}

/// File a key is written to.
pub fn destination(output_dir: &Path, prefix: &str, key: &NormalizedPath, kind: ContentKind) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    for segment in simplify_segments(prefix) {
        path.push(segment);
    }
    if !key.is_root() {
        for segment in key.as_str().split('/') {
            path.push(segment);
        }
    }
    if kind.is_html() {
        path.push("index.html");
    }
    path
}

/// Directory route relative links in a page resolve against.
fn base_route(prefix: &str, key: &NormalizedPath, kind: ContentKind) -> String {
    let dir = match kind {
        ContentKind::Directory => key.clone(),
        _ => key.parent(),
    };
    let prefix = simplify(prefix);
    if dir.is_root() {
        format!("/{prefix}/")
    } else {
        format!("/{prefix}/{dir}/")
    }
}

/// Rewrite local `href`/`src` links to absolute canonical routes.
///
/// External links, fragments and `mailto:`/`data:` URIs are left alone.
pub fn transform_links(html: &str, base_route: &str) -> String {
    LINK_ATTR
        .replace_all(html, |caps: &Captures<'_>| {
            let attr = &caps[1];
            let link = &caps[2];
            match canonical_link(link, base_route) {
                Some(rewritten) => format!("{attr}=\"{rewritten}\""),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn canonical_link(link: &str, base_route: &str) -> Option<String> {
    if link.is_empty()
        || link.starts_with('#')
        || link.starts_with("//")
        || link.contains("://")
        || link.starts_with("mailto:")
        || link.starts_with("data:")
    {
        return None;
    }

    let split = link.find(['?', '#']).unwrap_or(link.len());
    let (path, rest) = link.split_at(split);
    if path.is_empty() {
        return None;
    }

    let absolute = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{base_route}{path}")
    };

    let mut segments = simplify_segments(&absolute);
    if let Some(last) = segments.last_mut() {
        *last = strip_document_suffix(last);
    }
    let trailing = if path.ends_with('/') && !segments.is_empty() {
        "/"
    } else {
        ""
    };
    Some(format!("/{}{trailing}{rest}", segments.join("/")))
}
