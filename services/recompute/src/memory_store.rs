//! In-memory blob store for local runs and tests.
//!
//! Same contract as the S3 adapter: sorted complete listings, `None` for
//! missing keys, and length enforcement on stream puts. ETags are a
//! monotonic write counter, so a rewrite always changes the observed tag.

use crate::blob_store::{BlobStore, BlobStream, PutBody, PutResult, StorageError, TextAndEtag};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, (Bytes, String)>>,
    write_seq: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs, for test assertions.
    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }

    /// Raw bytes of a blob, for test assertions.
    pub async fn bytes_of(&self, key: &str) -> Option<Bytes> {
        self.blobs.lock().await.get(key).map(|(bytes, _)| bytes.clone())
    }

    /// ETag of a blob, for test assertions.
    pub async fn etag_of(&self, key: &str) -> Option<String> {
        self.blobs.lock().await.get(key).map(|(_, etag)| etag.clone())
    }

    fn next_etag(&self) -> String {
        format!("\"mem-{}\"", self.write_seq.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let blobs = self.blobs.lock().await;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_text_with_etag(key).await?.map(|r| r.text))
    }

    async fn get_text_with_etag(&self, key: &str) -> Result<Option<TextAndEtag>, StorageError> {
        let blobs = self.blobs.lock().await;
        match blobs.get(key) {
            Some((bytes, etag)) => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    StorageError::Durable(format!("get {key}: body is not UTF-8: {e}"))
                })?;
                Ok(Some(TextAndEtag {
                    text,
                    etag: etag.clone(),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_stream(&self, key: &str) -> Result<Option<BlobStream>, StorageError> {
        let blobs = self.blobs.lock().await;
        Ok(blobs.get(key).map(|(bytes, etag)| BlobStream {
            reader: Box::new(Cursor::new(bytes.to_vec())),
            etag: etag.clone(),
        }))
    }

    async fn put(&self, key: &str, body: PutBody) -> Result<PutResult, StorageError> {
        let bytes = body.into_bytes().await?;
        let etag = self.next_etag();
        let mut blobs = self.blobs.lock().await;
        blobs.insert(key.to_string(), (bytes, etag.clone()));
        Ok(PutResult { etag })
    }
}
