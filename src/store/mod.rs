pub mod fetch;

use crate::fs::tree_entry::TreeEntry;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use thiserror::Error;

use self::fetch::ObjectFetchContext;

pub const OBJECT_ID_LEN: usize = 20;

/// Content hash identifying a tree or blob in the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    pub fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Id whose low bytes are the big-endian encoding of `n`. Handy for
    /// tests and log examples.
    pub fn from_u64(n: u64) -> Self {
        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes[OBJECT_ID_LEN - 8..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(OBJECT_ID_LEN * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("fatal store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Byte-addressable blob and tree fetcher backing the projection. The
/// core never retries; retry policy belongs to the store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch_tree(
        &self,
        hash: &ObjectId,
        ctx: &dyn ObjectFetchContext,
    ) -> Result<Vec<TreeEntry>, StoreError>;

    async fn fetch_blob(
        &self,
        hash: &ObjectId,
        offset: u64,
        length: u64,
        ctx: &dyn ObjectFetchContext,
    ) -> Result<Bytes, StoreError>;

    async fn blob_size(
        &self,
        hash: &ObjectId,
        ctx: &dyn ObjectFetchContext,
    ) -> Result<u64, StoreError>;
}

/// In-memory store for tests: trees and blobs are registered up front,
/// fetches are counted per hash, and an optional delay widens race
/// windows in concurrency tests.
#[derive(Default)]
pub struct FakeObjectStore {
    trees: DashMap<ObjectId, Vec<TreeEntry>>,
    blobs: DashMap<ObjectId, Bytes>,
    tree_fetches: AtomicU64,
    tree_fetches_by_hash: DashMap<ObjectId, u64>,
    blob_fetches: AtomicU64,
    fetch_delay: Option<Duration>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn put_tree(&self, hash: ObjectId, entries: Vec<TreeEntry>) {
        self.trees.insert(hash, entries);
    }

    pub fn put_blob(&self, hash: ObjectId, data: impl Into<Bytes>) {
        self.blobs.insert(hash, data.into());
    }

    pub fn tree_fetch_count(&self) -> u64 {
        self.tree_fetches.load(AtomicOrdering::SeqCst)
    }

    pub fn tree_fetch_count_for(&self, hash: &ObjectId) -> u64 {
        self.tree_fetches_by_hash
            .get(hash)
            .map(|c| *c)
            .unwrap_or(0)
    }

    pub fn blob_fetch_count(&self) -> u64 {
        self.blob_fetches.load(AtomicOrdering::SeqCst)
    }

    async fn maybe_delay(&self) {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn fetch_tree(
        &self,
        hash: &ObjectId,
        ctx: &dyn ObjectFetchContext,
    ) -> Result<Vec<TreeEntry>, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Transient("fetch cancelled".to_string()));
        }
        self.tree_fetches.fetch_add(1, AtomicOrdering::SeqCst);
        *self.tree_fetches_by_hash.entry(*hash).or_insert(0) += 1;
        self.maybe_delay().await;
        self.trees
            .get(hash)
            .map(|e| e.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn fetch_blob(
        &self,
        hash: &ObjectId,
        offset: u64,
        length: u64,
        ctx: &dyn ObjectFetchContext,
    ) -> Result<Bytes, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Transient("fetch cancelled".to_string()));
        }
        self.blob_fetches.fetch_add(1, AtomicOrdering::SeqCst);
        self.maybe_delay().await;
        let blob = self.blobs.get(hash).ok_or(StoreError::NotFound)?;
        let start = (offset as usize).min(blob.len());
        let end = (offset.saturating_add(length) as usize).min(blob.len());
        Ok(blob.slice(start..end))
    }

    async fn blob_size(
        &self,
        hash: &ObjectId,
        ctx: &dyn ObjectFetchContext,
    ) -> Result<u64, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Transient("fetch cancelled".to_string()));
        }
        self.blobs
            .get(hash)
            .map(|b| b.len() as u64)
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::fetch::NullFetchContext;
    use super::*;

    #[test]
    fn test_object_id_hex() {
        let id = ObjectId::from_u64(0xfaceb00c);
        assert_eq!(id.to_hex(), "00000000000000000000000000000000faceb00c");
        assert_eq!(format!("{}", id), id.to_hex());
    }

    #[tokio::test]
    async fn test_fake_store_blob_ranges() {
        let store = FakeObjectStore::new();
        let hash = ObjectId::from_u64(1);
        store.put_blob(hash, &b"hello world"[..]);
        let ctx = NullFetchContext::get();

        let data = store.fetch_blob(&hash, 0, 5, ctx).await.unwrap();
        assert_eq!(&data[..], b"hello");

        let data = store.fetch_blob(&hash, 6, 100, ctx).await.unwrap();
        assert_eq!(&data[..], b"world");

        // Reads past the end are empty, not errors.
        let data = store.fetch_blob(&hash, 100, 5, ctx).await.unwrap();
        assert!(data.is_empty());

        assert_eq!(store.blob_size(&hash, ctx).await.unwrap(), 11);
        assert_eq!(store.blob_fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_fake_store_missing_objects() {
        let store = FakeObjectStore::new();
        let hash = ObjectId::from_u64(9);
        let ctx = NullFetchContext::get();
        assert!(matches!(
            store.fetch_tree(&hash, ctx).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.fetch_blob(&hash, 0, 1, ctx).await,
            Err(StoreError::NotFound)
        ));
    }
}
