//! Hide and private pattern matching.
//!
//! Patterns use gitignore syntax relative to the content root: `drafts/`
//! matches a directory and everything under it, `*.secret.md` matches by
//! name at any depth. A key matches when either its bare form or its `.md`
//! document form matches, so `private.md` also covers `/blog/private`.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::{ConfigError, PrivacyConfig};
use crate::paths::NormalizedPath;

/// A compiled pattern list.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<String>,
    matcher: Gitignore,
}

impl PatternSet {
    pub fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            builder
                .add_line(None, pattern)
                .map_err(|e| ConfigError::Invalid(format!("bad pattern {pattern:?}: {e}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("bad pattern list: {e}")))?;

        Ok(Self {
            patterns: patterns.to_vec(),
            matcher,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: Gitignore::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether the key, or any directory above it, matches.
    pub fn matches(&self, key: &NormalizedPath) -> bool {
        if key.is_root() || self.matcher.is_empty() {
            return false;
        }
        let bare = key.as_str();
        let document = key.document_form();
        [bare, document.as_str()].into_iter().any(|candidate| {
            self.matcher
                .matched_path_or_any_parents(candidate, false)
                .is_ignore()
                || self.matcher.matched(candidate, true).is_ignore()
        })
    }
}

/// The hide and private lists compiled together.
#[derive(Debug, Clone)]
pub struct PrivacySets {
    pub hide: PatternSet,
    pub private: PatternSet,
}

impl PrivacySets {
    pub fn compile(config: &PrivacyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            hide: PatternSet::compile(&config.hide)?,
            private: PatternSet::compile(&config.private)?,
        })
    }

    pub fn empty() -> Self {
        Self {
            hide: PatternSet::empty(),
            private: PatternSet::empty(),
        }
    }
}

/// Live privacy decision shared by the pipeline, listings, the index and
/// search. Swapped in one step on reload.
#[derive(Debug)]
pub struct PrivacyFilter {
    sets: RwLock<Arc<PrivacySets>>,
}

impl PrivacyFilter {
    pub fn new(sets: PrivacySets) -> Self {
        Self {
            sets: RwLock::new(Arc::new(sets)),
        }
    }

    pub fn from_config(config: &PrivacyConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(PrivacySets::compile(config)?))
    }

    /// Replace both lists at once.
    pub fn install(&self, sets: PrivacySets) {
        *self.sets.write() = Arc::new(sets);
    }

    /// Compile and install new lists. On a bad pattern the old lists stay.
    pub fn update(&self, config: &PrivacyConfig) -> Result<(), ConfigError> {
        self.install(PrivacySets::compile(config)?);
        Ok(())
    }

    pub fn current(&self) -> Arc<PrivacySets> {
        Arc::clone(&self.sets.read())
    }

    /// Hidden or private keys are never served, listed or returned by search.
    pub fn is_private(&self, key: &NormalizedPath) -> bool {
        self.matched_set(key).is_some()
    }

    /// Which list excludes the key, for logging.
    pub fn matched_set(&self, key: &NormalizedPath) -> Option<&'static str> {
        let sets = self.current();
        if sets.private.matches(key) {
            Some("private")
        } else if sets.hide.matches(key) {
            Some("hide")
        } else {
            None
        }
    }
}
