//! In-memory reference store.

use crate::{DocumentStore, StoreError};
use async_trait::async_trait;
use docmesh_types::{matches_document, Document, HlcTimestamp, OplogEntry, QueryNode, RemotePeer};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

/// A [`DocumentStore`] backed by in-process maps.
///
/// Used by the test suites and the demo node. Atomicity falls out of a
/// single mutex over the whole state: every contract operation runs
/// under one lock acquisition.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Documents keyed by `(collection, key)`.
    documents: BTreeMap<(String, String), Document>,
    /// Append-only operation log.
    oplog: Vec<OplogEntry>,
    /// Remote peers keyed by node id.
    peers: HashMap<String, RemotePeer>,
    closed: bool,
}

impl Inner {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn upsert(&mut self, doc: Document) {
        self.documents
            .insert((doc.collection.clone(), doc.key.clone()), doc);
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of oplog entries, including those for tombstones.
    pub async fn oplog_len(&self) -> usize {
        self.inner.lock().await.oplog.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        self.inner.lock().await.check_open()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.lock().await.closed = true;
        Ok(())
    }

    async fn latest_timestamp(&self) -> Result<HlcTimestamp, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        Ok(inner
            .documents
            .values()
            .map(|doc| doc.timestamp.clone())
            .max()
            .unwrap_or_else(HlcTimestamp::zero))
    }

    async fn get_document(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        Ok(inner
            .documents
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    async fn put_document(&self, doc: Document) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let entry = OplogEntry::put(
            doc.collection.clone(),
            doc.key.clone(),
            doc.data.clone(),
            doc.timestamp.clone(),
        );
        inner.upsert(doc);
        inner.oplog.push(entry);
        Ok(())
    }

    async fn delete_document(
        &self,
        collection: &str,
        key: &str,
        timestamp: HlcTimestamp,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let entry = OplogEntry::delete(collection, key, timestamp.clone());
        inner.upsert(Document::tombstone(collection, key, timestamp));
        inner.oplog.push(entry);
        Ok(())
    }

    async fn oplog_after(
        &self,
        since: &HlcTimestamp,
        limit: usize,
    ) -> Result<Vec<OplogEntry>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        let mut entries: Vec<OplogEntry> = inner
            .oplog
            .iter()
            .filter(|entry| entry.timestamp > *since)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn apply_batch(
        &self,
        docs: Vec<Document>,
        oplog: Vec<OplogEntry>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        for doc in docs {
            inner.upsert(doc);
        }
        inner.oplog.extend(oplog);
        Ok(())
    }

    async fn collections(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        let mut names: Vec<String> = inner
            .documents
            .keys()
            .map(|(collection, _)| collection.clone())
            .collect();
        names.dedup();
        Ok(names)
    }

    async fn find_documents(
        &self,
        collection: &str,
        query: &QueryNode,
    ) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        let mut found = Vec::new();
        for doc in inner.documents.values() {
            if doc.collection != collection || doc.tombstone {
                continue;
            }
            let value = doc.json()?;
            if matches_document(query, &value) {
                found.push(doc.clone());
            }
        }
        Ok(found)
    }

    async fn remote_peers(&self) -> Result<Vec<RemotePeer>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        Ok(inner.peers.values().cloned().collect())
    }

    async fn save_remote_peer(&self, peer: RemotePeer) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        inner.peers.insert(peer.node_id.clone(), peer);
        Ok(())
    }

    async fn remove_remote_peer(&self, node_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        inner.peers.remove(node_id);
        Ok(())
    }
}
