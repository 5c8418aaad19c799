// Tantivy-backed lexical slot, narrowed to the single repository this
// daemon serves (no repo-pool-wide multi-tenant index). Sticks to
// straightforward content/path search via `tantivy::query::QueryParser`
// rather than fuzzy path matching.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::tokenizer::NgramTokenizer;
use tantivy::{Document, IndexReader, IndexWriter, Term};
use tokio::sync::RwLock;

use super::schema::File;

pub struct FileDocument {
    pub relative_path: String,
    pub content: String,
    pub commit_hash: String,
}

fn read_document(schema: &File, doc: Document) -> FileDocument {
    let get_text = |field| doc.get_first(field).and_then(|v| v.as_text()).unwrap_or("").to_owned();
    FileDocument {
        relative_path: get_text(schema.relative_path),
        content: get_text(schema.content),
        commit_hash: get_text(schema.commit_hash),
    }
}

/// A wrapper around `tantivy::Index`/`IndexReader`, scoped to this
/// repository's content index.
pub struct LexicalIndex {
    pub source: File,
    pub index: tantivy::Index,
    pub reader: RwLock<IndexReader>,
    reindex_threads: usize,
    reindex_buffer_size: usize,
}

impl LexicalIndex {
    fn init_index(schema: tantivy::schema::Schema, path: &Path, threads: usize) -> Result<tantivy::Index> {
        fs::create_dir_all(path).context("failed to create lexical index dir")?;
        let mut index =
            tantivy::Index::open_or_create(tantivy::directory::MmapDirectory::open(path)?, schema)?;
        index.set_multithread_executor(threads)?;
        index
            .tokenizers()
            .register("default", NgramTokenizer::new(1, 3, false)?);
        Ok(index)
    }

    pub fn create(path: &Path, threads: usize, buffer_size: usize) -> Result<Self> {
        let source = File::new();
        let index = Self::init_index(source.schema.clone(), path, threads)?;
        let reader = index.reader()?.into();
        Ok(Self {
            source,
            index,
            reader,
            reindex_threads: threads,
            reindex_buffer_size: buffer_size,
        })
    }

    /// Returns `None` when no lexical index exists on disk yet for this
    /// repository — the caller is expected to treat that as
    /// `available=false` and cache the negative result.
    pub fn load_if_exists(path: &Path, threads: usize, buffer_size: usize) -> Result<Option<Self>> {
        if !path.join("meta.json").exists() {
            return Ok(None);
        }
        Self::create(path, threads, buffer_size).map(Some)
    }

    pub fn writer(&self) -> Result<IndexWriter> {
        Ok(self
            .index
            .writer_with_num_threads(self.reindex_threads, self.reindex_buffer_size)?)
    }

    pub async fn refresh_reader(&self) -> Result<()> {
        *self.reader.write().await = self.index.reader()?;
        Ok(())
    }

    pub fn delete_all(&self, writer: &IndexWriter) {
        writer.delete_all_documents().ok();
    }

    pub fn delete_by_unique_hash(&self, writer: &IndexWriter, unique_hash: &str) {
        writer.delete_term(Term::from_field_text(self.source.unique_hash, unique_hash));
    }

    pub async fn search(&self, query_str: &str, limit: usize) -> Result<Vec<FileDocument>> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let reader = self.reader.read().await;
        let searcher = reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.source.content, self.source.relative_path]);
        let query = parser.parse_query(query_str)?;
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        Ok(top_docs
            .into_iter()
            .map(|(_score, addr)| {
                let doc = searcher.doc(addr).expect("doc to exist for matched address");
                read_document(&self.source, doc)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_query_returns_no_results_without_touching_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::create(dir.path(), 1, 15_000_000).unwrap();
        let results = index.search("", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn indexed_document_is_found_by_content_search() {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::create(dir.path(), 1, 15_000_000).unwrap();
        {
            let mut writer = index.writer().unwrap();
            let mut doc = Document::new();
            doc.add_text(index.source.unique_hash, "file:a.rs");
            doc.add_text(index.source.relative_path, "a.rs");
            doc.add_text(index.source.content, "fn authentication_check() {}");
            doc.add_text(index.source.commit_hash, "deadbeef");
            writer.add_document(doc).unwrap();
            writer.commit().unwrap();
        }
        index.refresh_reader().await.unwrap();

        let results = index.search("authentication", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].relative_path, "a.rs");
    }
}
