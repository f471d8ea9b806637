//! Built-in strategies that scan the content tree on each query.

use async_trait::async_trait;
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::{SearchError, Searcher};
use crate::content::is_document;
use crate::paths::PathNormalizer;
use crate::privacy::PrivacyFilter;

/// The searchable documents under the content root.
#[derive(Clone)]
pub struct Corpus {
    root: PathBuf,
    normalizer: PathNormalizer,
    privacy: Arc<PrivacyFilter>,
}

impl Corpus {
    pub fn new(root: impl Into<PathBuf>, normalizer: PathNormalizer, privacy: Arc<PrivacyFilter>) -> Self {
        Self {
            root: root.into(),
            normalizer,
            privacy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every non-private `.md` file, skipping dot entries.
    pub fn documents(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            })
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && is_document(entry.path()))
            .map(|entry| entry.into_path())
            .filter(|path| !self.privacy.is_private(&self.normalizer.from_storage(path)))
            .collect()
    }

    /// Run a scoring function over every document on the blocking pool.
    ///
    /// Documents scoring `None` are dropped; the rest are sorted by score,
    /// then path, and truncated to `limit`.
    async fn rank<S, F>(&self, limit: usize, score: F) -> Result<Vec<PathBuf>, SearchError>
    where
        S: Ord + Send + 'static,
        F: Fn(&Path) -> Option<S> + Send + 'static,
    {
        let corpus = self.clone();
        let ranked = tokio::task::spawn_blocking(move || {
            let mut scored: Vec<(S, PathBuf)> = corpus
                .documents()
                .into_iter()
                .filter_map(|path| score(&path).map(|s| (s, path)))
                .collect();
            scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            scored.into_iter().take(limit).map(|(_, path)| path).collect()
        })
        .await
        .map_err(|e| SearchError::Index(format!("search task failed: {e}")))?;
        Ok(ranked)
    }
}

fn read_text(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Fuzzy match against file names.
pub struct TitleSearcher {
    corpus: Corpus,
}

impl TitleSearcher {
    pub fn new(corpus: Corpus) -> Self {
        Self { corpus }
    }
}

/// Distance between a query and a file stem; `None` when too far apart.
pub fn title_score(query: &str, stem: &str) -> Option<usize> {
    let query = query.to_lowercase();
    let stem = stem.to_lowercase();
    if stem.contains(&query) {
        return Some(0);
    }
    let distance = edit_distance(&query, &stem);
    let tolerance = (query.chars().count() / 3).max(1);
    (distance <= tolerance).then_some(distance)
}

#[async_trait]
impl Searcher for TitleSearcher {
    fn name(&self) -> &str {
        "title"
    }

    fn brief(&self) -> &str {
        "fuzzy match on document titles"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PathBuf>, SearchError> {
        let query = query.to_string();
        self.corpus
            .rank(limit, move |path| {
                let stem = path.file_stem()?.to_string_lossy();
                title_score(&query, &stem)
            })
            .await
    }
}

/// Case-insensitive substring match on document text, most occurrences first.
pub struct ContentSearcher {
    corpus: Corpus,
}

impl ContentSearcher {
    pub fn new(corpus: Corpus) -> Self {
        Self { corpus }
    }
}

#[async_trait]
impl Searcher for ContentSearcher {
    fn name(&self) -> &str {
        "content"
    }

    fn brief(&self) -> &str {
        "substring match on document content"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PathBuf>, SearchError> {
        let needle = query.to_lowercase();
        self.corpus
            .rank(limit, move |path| {
                let text = read_text(path)?.to_lowercase();
                let count = text.matches(needle.as_str()).count();
                (count > 0).then_some(Reverse(count))
            })
            .await
    }
}

/// Match against `keywords:` and `tags:` lines in documents.
pub struct KeywordSearcher {
    corpus: Corpus,
}

impl KeywordSearcher {
    pub fn new(corpus: Corpus) -> Self {
        Self { corpus }
    }
}

/// Keywords declared by a document, lowercased.
pub fn declared_keywords(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (label, rest) = line.split_once(':')?;
            matches!(label.trim().to_lowercase().as_str(), "keywords" | "tags").then_some(rest)
        })
        .flat_map(|rest| rest.split([',', ' ']))
        .map(|word| word.trim().trim_matches(['[', ']', '"', '\'']).to_lowercase())
        .filter(|word| !word.is_empty())
        .collect()
}

#[async_trait]
impl Searcher for KeywordSearcher {
    fn name(&self) -> &str {
        "keyword"
    }

    fn brief(&self) -> &str {
        "match on declared keywords and tags"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PathBuf>, SearchError> {
        let wanted: Vec<String> = query
            .split([',', ' '])
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self.corpus
            .rank(limit, move |path| {
                let keywords = declared_keywords(&read_text(path)?);
                let hits = wanted.iter().filter(|w| keywords.contains(w)).count();
                (hits > 0).then_some(Reverse(hits))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivacyConfig;
    use std::fs;
    use tempfile::TempDir;

    fn corpus() -> (TempDir, Corpus) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("intro.md"), "# Intro\nrust rust rust\nkeywords: rust, web\n").unwrap();
        fs::write(root.join("introduction.md"), "rust\n").unwrap();
        fs::write(root.join("private.md"), "rust rust rust rust\ntags: rust\n").unwrap();
        fs::create_dir(root.join("notes")).unwrap();
        fs::write(root.join("notes/tools.md"), "tags: [cli, rust]\nrust rust\n").unwrap();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git/intro.md"), "rust").unwrap();
        fs::write(root.join("logo.png"), "intro").unwrap();

        let privacy = Arc::new(
            PrivacyFilter::from_config(&PrivacyConfig {
                hide: vec![],
                private: vec!["private.md".into()],
            })
            .unwrap(),
        );
        let normalizer = PathNormalizer::new("/blog", root);
        let corpus = Corpus::new(root, normalizer, privacy);
        (dir, corpus)
    }

    fn names(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_documents_skip_private_dot_and_assets() {
        let (dir, corpus) = corpus();
        let docs = corpus.documents();
        assert_eq!(
            names(dir.path(), &docs),
            vec!["intro.md", "introduction.md", "notes/tools.md"]
        );
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }

    #[test]
    fn test_title_score() {
        assert_eq!(title_score("intro", "Introduction"), Some(0));
        assert_eq!(title_score("intr0", "intro"), Some(1));
        assert_eq!(title_score("zzz", "intro"), None);
    }

    #[tokio::test]
    async fn test_title_search() {
        let (dir, corpus) = corpus();
        let results = TitleSearcher::new(corpus).search("intro", 10).await.unwrap();
        assert_eq!(names(dir.path(), &results), vec!["intro.md", "introduction.md"]);
    }

    #[tokio::test]
    async fn test_content_search_ranks_by_occurrences() {
        let (dir, corpus) = corpus();
        let results = ContentSearcher::new(corpus).search("RUST", 2).await.unwrap();
        assert_eq!(names(dir.path(), &results), vec!["intro.md", "notes/tools.md"]);
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let (dir, corpus) = corpus();
        let searcher = KeywordSearcher::new(corpus);

        let results = searcher.search("cli", 10).await.unwrap();
        assert_eq!(names(dir.path(), &results), vec!["notes/tools.md"]);

        let results = searcher.search("rust web", 10).await.unwrap();
        assert_eq!(names(dir.path(), &results), vec!["intro.md", "notes/tools.md"]);
    }

    #[test]
    fn test_declared_keywords() {
        let text = "title\nKeywords: Rust, Web\ntags: [\"a\", 'b']\nbody: no\n";
        assert_eq!(declared_keywords(text), vec!["rust", "web", "a", "b"]);
    }
}
