//! In-memory inverted index over document text.
//!
//! Kept current by the index updater: every content change deletes the
//! document's term and re-adds it if it is still a public document.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term, doc};

use super::{SearchError, Searcher};
use crate::paths::to_slash;

/// Writer heap for a single indexing thread.
const WRITER_HEAP_BYTES: usize = 20_000_000;

struct Fields {
    path: Field,
    title: Field,
    body: Field,
}

pub struct FullTextIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter<TantivyDocument>>,
    fields: Fields,
}

impl FullTextIndex {
    pub fn in_memory() -> Result<Self, SearchError> {
        let mut builder = Schema::builder();
        let path = builder.add_text_field("path", STRING | STORED);
        let title = builder.add_text_field("title", TEXT | STORED);
        let body = builder.add_text_field("body", TEXT);
        let schema = builder.build();

        let index = Index::create_in_ram(schema);
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields: Fields { path, title, body },
        })
    }

    fn path_term(&self, path: &Path) -> Term {
        Term::from_field_text(self.fields.path, &to_slash(path))
    }

    /// Replace the entry for `path`. Visible after [`commit`](Self::commit).
    pub fn upsert(&self, path: &Path, title: &str, body: &str) -> Result<(), SearchError> {
        let writer = self.writer.lock();
        writer.delete_term(self.path_term(path));
        writer.add_document(doc!(
            self.fields.path => to_slash(path),
            self.fields.title => title,
            self.fields.body => body,
        ))?;
        Ok(())
    }

    /// Drop the entry for `path`, if any.
    pub fn remove(&self, path: &Path) {
        self.writer.lock().delete_term(self.path_term(path));
    }

    pub fn commit(&self) -> Result<(), SearchError> {
        self.writer.lock().commit()?;
        self.reader.reload()?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<PathBuf>, SearchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.body]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            crate::debug_event!("fulltext", "lenient parse", "{query}: {} issues", errors.len());
        }

        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;
        let mut paths = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(path) = doc.get_first(self.fields.path).and_then(|v| v.as_str()) {
                paths.push(PathBuf::from(path));
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl Searcher for FullTextIndex {
    fn name(&self) -> &str {
        "fulltext"
    }

    fn brief(&self) -> &str {
        "ranked full-text search over titles and content"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<PathBuf>, SearchError> {
        self.query(query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_search_remove() {
        let index = FullTextIndex::in_memory().unwrap();
        index
            .upsert(Path::new("/c/rust.md"), "Rust", "ownership and borrowing")
            .unwrap();
        index
            .upsert(Path::new("/c/go.md"), "Go", "goroutines and channels")
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("borrowing", 10).await.unwrap();
        assert_eq!(hits, vec![PathBuf::from("/c/rust.md")]);

        index.remove(Path::new("/c/rust.md"));
        index.commit().unwrap();
        assert!(index.search("borrowing", 10).await.unwrap().is_empty());
        assert_eq!(index.num_docs(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_entry() {
        let index = FullTextIndex::in_memory().unwrap();
        index.upsert(Path::new("/c/a.md"), "A", "old words").unwrap();
        index.commit().unwrap();
        index.upsert(Path::new("/c/a.md"), "A", "new words").unwrap();
        index.commit().unwrap();

        assert!(index.search("old", 10).await.unwrap().is_empty());
        assert_eq!(index.search("new", 10).await.unwrap().len(), 1);
        assert_eq!(index.num_docs(), 1);
    }

    #[tokio::test]
    async fn test_zero_limit_and_malformed_query() {
        let index = FullTextIndex::in_memory().unwrap();
        index.upsert(Path::new("/c/a.md"), "A", "words").unwrap();
        index.commit().unwrap();

        assert!(index.search("words", 0).await.unwrap().is_empty());
        assert!(index.search("words AND (", 10).await.is_ok());
    }
}
