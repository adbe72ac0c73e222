use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::store::{
    ChangeEvent, ChangeKind, Collection, Document, DocumentStore, Filter, StoreError, StoreResult,
    WriteBatch, WriteOp,
};

type DocKey = (Collection, String);
type SubKey = (Collection, String, String);

/// In-process document store. Reads run concurrently; a commit holds the
/// gate exclusively so readers never observe half of a batch.
pub struct MemoryStore {
    documents: DashMap<DocKey, Document>,
    subcollections: DashMap<SubKey, Vec<Document>>,
    gate: RwLock<()>,
    offline: AtomicBool,
    events_tx: broadcast::Sender<ChangeEvent>,
}

struct Staged {
    doc: Document,
    base_version: u64,
    kind: ChangeKind,
}

impl MemoryStore {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));
        Self {
            documents: DashMap::new(),
            subcollections: DashMap::new(),
            gate: RwLock::new(()),
            offline: AtomicBool::new(false),
            events_tx,
        }
    }

    /// Simulates an outage: every call fails with `Unavailable` until
    /// switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.documents
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .count()
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("document store is offline".to_string()));
        }
        Ok(())
    }

    fn stage_existing(&self, collection: Collection, id: &str) -> StoreResult<Staged> {
        let current = self
            .documents
            .get(&(collection, id.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.name(),
                id: id.to_string(),
            })?;
        let base_version = current.version;
        let mut doc = current;
        doc.version += 1;
        Ok(Staged {
            doc,
            base_version,
            kind: ChangeKind::Updated,
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Document>> {
        self.ensure_online()?;
        let _read = self.gate.read().await;
        Ok(self
            .documents
            .get(&(collection, id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn query(&self, collection: Collection, filters: &[Filter]) -> StoreResult<Vec<Document>> {
        self.ensure_online()?;
        let _read = self.gate.read().await;
        let mut matches: Vec<Document> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .filter(|entry| filters.iter().all(|f| f.matches(&entry.value().data)))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn list_sub(
        &self,
        collection: Collection,
        parent_id: &str,
        sub: &str,
    ) -> StoreResult<Vec<Document>> {
        self.ensure_online()?;
        let _read = self.gate.read().await;
        Ok(self
            .subcollections
            .get(&(collection, parent_id.to_string(), sub.to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        self.ensure_online()?;
        let _write = self.gate.write().await;
        let now = Utc::now();

        // Stage everything first; nothing touches the maps until every op
        // has validated.
        let mut staged: HashMap<DocKey, Staged> = HashMap::new();
        let mut order: Vec<DocKey> = Vec::new();
        let mut appended: Vec<(SubKey, Document)> = Vec::new();

        for op in batch.into_ops() {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    data,
                } => {
                    let key = (collection, id.clone());
                    if staged.contains_key(&key) || self.documents.contains_key(&key) {
                        return Err(StoreError::AlreadyExists {
                            collection: collection.name(),
                            id,
                        });
                    }
                    order.push(key.clone());
                    staged.insert(
                        key,
                        Staged {
                            doc: Document {
                                id,
                                version: 1,
                                data,
                            },
                            base_version: 0,
                            kind: ChangeKind::Created,
                        },
                    );
                }
                WriteOp::Patch {
                    collection,
                    id,
                    patch,
                    expected_version,
                } => {
                    let key = (collection, id.clone());
                    if !staged.contains_key(&key) {
                        let entry = self.stage_existing(collection, &id)?;
                        order.push(key.clone());
                        staged.insert(key.clone(), entry);
                    }
                    if let Some(entry) = staged.get_mut(&key) {
                        if let Some(expected) = expected_version {
                            if expected != entry.base_version {
                                return Err(StoreError::Conflict {
                                    collection: collection.name(),
                                    id,
                                    expected,
                                    found: entry.base_version,
                                });
                            }
                        }
                        patch.apply(&mut entry.doc.data, now);
                    }
                }
                WriteOp::Append {
                    collection,
                    parent_id,
                    sub,
                    id,
                    data,
                } => {
                    appended.push((
                        (collection, parent_id, sub),
                        Document {
                            id,
                            version: 1,
                            data,
                        },
                    ));
                }
            }
        }

        let mut events = Vec::with_capacity(order.len() + appended.len());
        for key in order {
            if let Some(entry) = staged.remove(&key) {
                events.push(ChangeEvent {
                    collection: key.0,
                    id: key.1.clone(),
                    kind: entry.kind,
                    version: entry.doc.version,
                });
                self.documents.insert(key, entry.doc);
            }
        }
        for (key, doc) in appended {
            let parent_version = self
                .documents
                .get(&(key.0, key.1.clone()))
                .map(|entry| entry.value().version)
                .unwrap_or(0);
            events.push(ChangeEvent {
                collection: key.0,
                id: key.1.clone(),
                kind: ChangeKind::Appended,
                version: parent_version,
            });
            self.subcollections.entry(key).or_default().push(doc);
        }

        debug!(writes = events.len(), "batch committed");
        for event in events {
            let _ = self.events_tx.send(event);
        }

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events_tx.subscribe()
    }
}
