//! Document store: id → document text and metadata.
//!
//! The whole collection lives in memory and is mirrored to one JSON file,
//! rewritten through a temp file plus rename on every mutation so a crash
//! leaves either the old or the new file on disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use pubrag_core::error::{Error, Result};
use pubrag_core::types::{Document, DocumentId};

pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    documents: Vec<&'a Document>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Default, Clone)]
struct Inner {
    by_id: HashMap<DocumentId, Document>,
    /// Insertion order; a replaced document keeps its slot.
    order: Vec<DocumentId>,
}

impl Inner {
    fn upsert(&mut self, doc: Document) {
        if !self.by_id.contains_key(&doc.id) {
            self.order.push(doc.id.clone());
        }
        self.by_id.insert(doc.id.clone(), doc);
    }

    fn remove(&mut self, id: &str) -> bool {
        if self.by_id.remove(id).is_none() {
            return false;
        }
        self.order.retain(|o| o != id);
        true
    }

    fn ordered(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

pub struct DocumentStore {
    path: PathBuf,
    raw_dir: Option<PathBuf>,
    inner: RwLock<Inner>,
}

impl DocumentStore {
    /// Load `path` if it exists. A missing file is an empty store; a file
    /// that cannot be parsed is a `Storage` error.
    pub fn open(path: impl AsRef<Path>, raw_dir: Option<PathBuf>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut inner = Inner::default();
        if path.exists() {
            let bytes = fs::read(&path).map_err(|e| storage_err(&path, e))?;
            let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| storage_err(&path, e))?;
            if file.version != STORE_FORMAT_VERSION {
                return Err(Error::Storage(format!(
                    "{}: unsupported store version {} (expected {STORE_FORMAT_VERSION})",
                    path.display(),
                    file.version
                )));
            }
            for doc in file.documents {
                inner.upsert(doc);
            }
        }
        info!(path = %path.display(), documents = inner.order.len(), "document store loaded");
        Ok(Self { path, raw_dir, inner: RwLock::new(inner) })
    }

    pub fn put(&self, document: Document) -> Result<()> {
        self.put_many(vec![document])
    }

    /// Insert or replace each document by id, then save once. Nothing
    /// changes in memory unless the save succeeds.
    pub fn put_many(&self, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut inner = self.write()?;
        let mut next = inner.clone();
        for doc in &documents {
            next.upsert(doc.clone());
        }
        self.save(&next)?;
        *inner = next;
        for doc in &documents {
            self.write_raw_copy(doc);
        }
        debug!(count = documents.len(), total = inner.order.len(), "documents stored");
        Ok(())
    }

    /// Remove documents by id and save. Unknown ids are ignored; returns
    /// how many were removed.
    pub fn remove_many(&self, ids: &[DocumentId]) -> Result<usize> {
        let mut inner = self.write()?;
        let mut next = inner.clone();
        let mut removed = 0;
        for id in ids {
            if next.remove(id) {
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(0);
        }
        self.save(&next)?;
        *inner = next;
        debug!(removed, total = inner.order.len(), "documents removed");
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Result<Document> {
        self.read()?.by_id.get(id).cloned().ok_or_else(|| Error::NotFound(format!("document '{id}'")))
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.read()?.by_id.contains_key(id))
    }

    /// All documents in insertion order.
    pub fn list(&self) -> Result<Vec<Document>> {
        Ok(self.read()?.ordered().cloned().collect())
    }

    pub fn ids(&self) -> Result<Vec<DocumentId>> {
        Ok(self.read()?.order.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.order.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        self.save(&Inner::default())?;
        *inner = Inner::default();
        info!(path = %self.path.display(), "document store cleared");
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| Error::Storage("document store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| Error::Storage("document store lock poisoned".into()))
    }

    fn save(&self, inner: &Inner) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let file = StoreFileRef { version: STORE_FORMAT_VERSION, documents: inner.ordered().collect() };
        let payload = serde_json::to_vec_pretty(&file).map_err(|e| storage_err(&self.path, e))?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| storage_err(&self.path, e.error))?;
        Ok(())
    }

    /// Reference copy under `raw_dir`; failures are logged, not returned.
    fn write_raw_copy(&self, doc: &Document) {
        let Some(dir) = &self.raw_dir else { return };
        let target = dir.join(format!("{}.json", raw_file_stem(&doc.id)));
        let result = fs::create_dir_all(dir)
            .and_then(|()| serde_json::to_vec_pretty(doc).map_err(std::io::Error::other))
            .and_then(|bytes| fs::write(&target, bytes));
        if let Err(e) = result {
            warn!(id = %doc.id, path = %target.display(), error = %e, "failed to write raw document copy");
        }
    }
}

fn storage_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{}: {e}", path.display()))
}

/// File-name-safe form of a document id. Bytes outside `[A-Za-z0-9._-]`
/// become `%XX`, so distinct ids never share a file.
fn raw_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_file_names_are_sanitised() {
        assert_eq!(raw_file_stem("pmid-12345"), "pmid-12345");
        assert_eq!(raw_file_stem("../etc/passwd"), "..%2Fetc%2Fpasswd");
        assert_eq!(raw_file_stem("pmid:1"), "pmid%3A1");
    }

    #[test]
    fn colon_and_underscore_ids_get_distinct_files() {
        assert_ne!(raw_file_stem("pmid:1"), raw_file_stem("pmid_1"));
        assert_ne!(raw_file_stem("a%3A"), raw_file_stem("a:"));
    }
}
