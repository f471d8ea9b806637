//! Path normalization shared by the request pipeline, the coherence
//! coordinator and the search result translator.
//!
//! A [`NormalizedPath`] is the key for a content item: slash separated,
//! relative to the content root, with `.`/`..` resolved lexically and the
//! `.md` suffix removed. The content root itself is `.`.

use std::fmt;
use std::path::Path;

use crate::config::Settings;

/// Suffix of source documents. `/blog/intro` and `/blog/intro.md` share a key.
pub const DOCUMENT_SUFFIX: &str = ".md";

/// Key of the content root.
pub const ROOT_KEY: &str = ".";

/// Canonical key identifying a content item independent of routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    pub fn root() -> Self {
        Self(ROOT_KEY.to_string())
    }

    /// Normalize a key-like string (no routing prefix handling).
    pub fn new(path: &str) -> Self {
        let mut segments = simplify_segments(path);
        if let Some(last) = segments.last_mut() {
            *last = strip_document_suffix(last);
        }
        if segments.is_empty() {
            Self::root()
        } else {
            Self(segments.join("/"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_KEY
    }

    /// Key of the enclosing directory. The root is its own parent.
    pub fn parent(&self) -> NormalizedPath {
        match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        }
    }

    /// Key of a direct child entry.
    pub fn join(&self, name: &str) -> NormalizedPath {
        if self.is_root() {
            Self::new(name)
        } else {
            Self::new(&format!("{}/{}", self.0, name))
        }
    }

    /// The key with the document suffix put back, used for pattern matching.
    pub fn document_form(&self) -> String {
        format!("{}{}", self.0, DOCUMENT_SUFFIX)
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Convert a filesystem path to a forward-slash string.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lexically simplify a slash path into its segments.
///
/// Empty and `.` segments are dropped, `..` pops the previous segment and
/// never climbs above the start.
pub fn simplify_segments(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments
}

/// Lexically simplify a slash path, returning it without leading slash.
pub fn simplify(path: &str) -> String {
    simplify_segments(path).join("/")
}

/// Remove trailing `.md` suffixes from a single path segment.
///
/// Stops before producing an empty, `.` or `..` segment so the result is
/// itself a fixed point.
pub fn strip_document_suffix(segment: &str) -> &str {
    let mut current = segment;
    while let Some(stem) = current.strip_suffix(DOCUMENT_SUFFIX) {
        if stem.is_empty() || stem == "." || stem == ".." {
            break;
        }
        current = stem;
    }
    current
}

/// Maps between routed URLs, storage paths and [`NormalizedPath`] keys.
///
/// Pure: never touches the filesystem. Built once at startup from the
/// mounted route prefix; a reloaded prefix applies after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNormalizer {
    /// Routing prefix with leading slash and no trailing slash, e.g. `/blog`.
    route_prefix: String,
    /// Content root in slash form without trailing slash.
    content_root: String,
}

impl PathNormalizer {
    pub fn new(route_prefix: &str, content_root: &Path) -> Self {
        let prefix = simplify(route_prefix);
        let route_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("/{prefix}")
        };

        let mut content_root = to_slash(content_root);
        while content_root.len() > 1 && content_root.ends_with('/') {
            content_root.pop();
        }

        Self {
            route_prefix,
            content_root,
        }
    }

    /// Normalizer for a resolved content root and the configured prefix.
    pub fn from_settings(settings: &Settings, content_root: &Path) -> Self {
        Self::new(&settings.server.content_router, content_root)
    }

    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    pub fn content_root(&self) -> &str {
        &self.content_root
    }

    /// Normalize a request path into a key.
    ///
    /// Only absolute request paths carry the routing prefix; keys never start
    /// with `/`, which keeps `normalize(normalize(p)) == normalize(p)`.
    pub fn normalize(&self, request_path: &str) -> NormalizedPath {
        let request_path = request_path.replace('\\', "/");
        if !request_path.starts_with('/') {
            return NormalizedPath::new(&request_path);
        }

        let segments = simplify_segments(&request_path);
        let prefix = simplify_segments(&self.route_prefix);
        let rest = if !prefix.is_empty() && segments.starts_with(&prefix) {
            &segments[prefix.len()..]
        } else {
            &segments[..]
        };
        NormalizedPath::new(&rest.join("/"))
    }

    /// Key for a storage path under the content root.
    pub fn from_storage(&self, path: &Path) -> NormalizedPath {
        let path = to_slash(path);
        let segments = simplify_segments(&path);
        let root = simplify_segments(&self.content_root);
        if segments.starts_with(&root) {
            NormalizedPath::new(&segments[root.len()..].join("/"))
        } else {
            NormalizedPath::new(&path)
        }
    }

    /// Routed URL for a storage path, the inverse of the prefix handling in
    /// [`normalize`](Self::normalize).
    ///
    /// Returns `None` for paths shorter than, or outside of, the content root.
    pub fn to_route(&self, storage_path: &Path) -> Option<String> {
        let path = to_slash(storage_path);
        if path.is_empty() || path.len() < self.content_root.len() {
            return None;
        }
        let rest = path.strip_prefix(&self.content_root)?;
        if !rest.is_empty() && !rest.starts_with('/') && !self.content_root.ends_with('/') {
            return None;
        }
        Some(format!("{}/{}", self.route_prefix, simplify(rest)))
    }

    /// Routed URL that serves a key.
    pub fn route_for(&self, key: &NormalizedPath) -> String {
        if key.is_root() {
            format!("{}/", self.route_prefix)
        } else {
            format!("{}/{}", self.route_prefix, key)
        }
    }
}
