//! Content loading and rendering.
//!
//! [`FsLoader`] maps a key to a file under the content root: directories
//! become an HTML listing, `.md` documents are rendered with pulldown-cmark,
//! everything else is served as-is.

use bytes::Bytes;
use pulldown_cmark::{Options, Parser, html};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::paths::{DOCUMENT_SUFFIX, NormalizedPath, PathNormalizer};
use crate::privacy::PrivacyFilter;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("No content for '{key}'")]
    NotFound { key: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8", path.display())]
    Encoding { path: PathBuf },
}

/// What a rendered item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Directory,
    Document,
    Asset,
}

impl ContentKind {
    /// Listings and documents carry links that may need rewriting.
    pub fn is_html(self) -> bool {
        matches!(self, ContentKind::Directory | ContentKind::Document)
    }
}

/// A rendered content item as stored in the cache.
#[derive(Debug, Clone)]
pub struct ContentItem {
    /// Storage path the item was loaded from.
    pub path: PathBuf,
    pub kind: ContentKind,
    pub title: String,
    /// Source text of a document, used by the full-text index.
    pub text: Option<String>,
    /// Response body.
    pub body: Bytes,
}

/// Turns a key into rendered content.
pub trait ContentLoader: Send + Sync {
    /// Storage path that would back a key, without touching the filesystem.
    fn url_to_path(&self, key: &NormalizedPath) -> PathBuf;

    fn load(&self, key: &NormalizedPath) -> Result<ContentItem, LoadError>;
}

/// Loader for a directory of Markdown documents and static assets.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
    normalizer: PathNormalizer,
    privacy: Option<Arc<PrivacyFilter>>,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>, normalizer: PathNormalizer) -> Self {
        Self {
            root: root.into(),
            normalizer,
            privacy: None,
        }
    }

    /// Leave private entries out of directory listings.
    pub fn with_privacy(mut self, privacy: Arc<PrivacyFilter>) -> Self {
        self.privacy = Some(privacy);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &NormalizedPath) -> Option<PathBuf> {
        let direct = self.url_to_path(key);
        if direct.exists() {
            return Some(direct);
        }
        if key.is_root() {
            return None;
        }
        let document = self.root.join(key.document_form());
        document.is_file().then_some(document)
    }

    fn render_listing(&self, key: &NormalizedPath, dir: &Path) -> Result<ContentItem, LoadError> {
        let io_err = |source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let child = key.join(&name);
            if self.privacy.as_ref().is_some_and(|p| p.is_private(&child)) {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push((is_dir, name, child));
        }
        // Directories first, then by name
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let title = if key.is_root() {
            "Index".to_string()
        } else {
            key.as_str().rsplit('/').next().unwrap_or(key.as_str()).to_string()
        };

        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
        out.push_str(&format!("<title>{}</title></head><body>\n", escape_html(&title)));
        out.push_str(&format!("<h1>{}</h1>\n<ul>\n", escape_html(&title)));
        for (is_dir, name, child) in &entries {
            let label = if *is_dir {
                format!("{name}/")
            } else {
                name.strip_suffix(DOCUMENT_SUFFIX).unwrap_or(name).to_string()
            };
            out.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                escape_html(&self.normalizer.route_for(child)),
                escape_html(&label)
            ));
        }
        out.push_str("</ul>\n</body></html>\n");

        Ok(ContentItem {
            path: dir.to_path_buf(),
            kind: ContentKind::Directory,
            title,
            text: None,
            body: Bytes::from(out),
        })
    }

    fn render_document(&self, path: &Path) -> Result<ContentItem, LoadError> {
        let raw = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(raw).map_err(|_| LoadError::Encoding {
            path: path.to_path_buf(),
        })?;

        let title = document_title(&text).unwrap_or_else(|| file_stem(path));
        let body = render_markdown(&title, &text);

        Ok(ContentItem {
            path: path.to_path_buf(),
            kind: ContentKind::Document,
            title,
            text: Some(text),
            body: Bytes::from(body),
        })
    }

    fn read_asset(&self, path: &Path) -> Result<ContentItem, LoadError> {
        let body = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(ContentItem {
            path: path.to_path_buf(),
            kind: ContentKind::Asset,
            title: file_stem(path),
            text: None,
            body: Bytes::from(body),
        })
    }
}

impl ContentLoader for FsLoader {
    fn url_to_path(&self, key: &NormalizedPath) -> PathBuf {
        if key.is_root() {
            self.root.clone()
        } else {
            self.root.join(key.as_str())
        }
    }

    fn load(&self, key: &NormalizedPath) -> Result<ContentItem, LoadError> {
        let path = self.resolve(key).ok_or_else(|| LoadError::NotFound {
            key: key.to_string(),
        })?;

        if path.is_dir() {
            self.render_listing(key, &path)
        } else if is_document(&path) {
            self.render_document(&path)
        } else {
            self.read_asset(&path)
        }
    }
}

pub fn is_document(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "md")
}

/// Text of the first level-one heading.
pub fn document_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn render_markdown(title: &str, text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut rendered = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut rendered, Parser::new_ext(text, options));

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head><body>\n{}</body></html>\n",
        escape_html(title),
        rendered
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
