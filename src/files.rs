//! File storage: lookups for uploaded originals and their per-page rendered
//! images. The conversion pipeline that produces these pages is an external
//! collaborator — this module only defines the read-side contract the loop
//! needs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::Result;

/// Metadata for an uploaded file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub filename: String,
    pub mime_type: String,
}

/// One rendered page of a file.
#[derive(Debug, Clone)]
pub struct FileImage {
    pub file_id: i64,
    pub page_number: u32,
    /// Base64-encoded WebP image data, ready to embed in a `data:` URI.
    pub image_data_base64: String,
    pub width: u32,
    pub height: u32,
}

/// Read-only access to uploaded files and their rendered pages.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn lookup(&self, file_id: i64) -> Result<Option<FileRecord>>;
    async fn pages(&self, file_id: i64) -> Result<Vec<FileImage>>;
}

/// An in-memory `FileStore` for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryFileStore {
    records: RwLock<HashMap<i64, FileRecord>>,
    pages: RwLock<HashMap<i64, Vec<FileImage>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: FileRecord, pages: Vec<FileImage>) {
        let id = record.id;
        self.records.write().await.insert(id, record);
        self.pages.write().await.insert(id, pages);
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn lookup(&self, file_id: i64) -> Result<Option<FileRecord>> {
        Ok(self.records.read().await.get(&file_id).cloned())
    }

    async fn pages(&self, file_id: i64) -> Result<Vec<FileImage>> {
        Ok(self.pages.read().await.get(&file_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_skipped_silently() {
        let store = InMemoryFileStore::new();
        assert!(store.lookup(42).await.unwrap().is_none());
        assert!(store.pages(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn round_trips_inserted_pages() {
        let store = InMemoryFileStore::new();
        store
            .insert(
                FileRecord { id: 1, filename: "a.pdf".into(), mime_type: "application/pdf".into() },
                vec![FileImage { file_id: 1, page_number: 1, image_data_base64: "AA==".into(), width: 10, height: 10 }],
            )
            .await;
        let rec = store.lookup(1).await.unwrap().unwrap();
        assert_eq!(rec.filename, "a.pdf");
        assert_eq!(store.pages(1).await.unwrap().len(), 1);
    }
}
