use async_trait::async_trait;
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::domain::ids::WorkloadKey;
use crate::domain::workload::Workload;
use crate::error::{Error, Result};
use crate::store::WorkloadStore;

new_key_type! {
    pub struct WorkloadId;
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Workload storage.
    slots: SlotMap<WorkloadId, Workload>,

    /// Index lookup of the internal key (WorkloadId) by namespaced workload key.
    key_index: HashMap<WorkloadKey, WorkloadId>,
}

/// In-process [`WorkloadStore`] used by the binary and the test suites.
///
/// Objects get a uid at creation and a monotonically increasing resource
/// version on every write; updates submitted with a stale version lose with
/// [`Error::Conflict`], mirroring the optimistic concurrency of the real store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    /// Both maps are protected with a single lock.
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(StoreInner::default())) }
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.read().expect("RwLock poisoned");
        guard.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WorkloadStore for InMemoryStore {
    async fn get(&self, key: &WorkloadKey) -> Result<Workload> {
        let guard = self.inner.read().expect("RwLock poisoned");
        let id = guard.key_index.get(key).ok_or_else(|| Error::NotFound(format!("workload {}", key)))?;
        Ok(guard.slots[*id].clone())
    }

    async fn list(&self) -> Result<Vec<Workload>> {
        let guard = self.inner.read().expect("RwLock poisoned");
        let mut workloads: Vec<Workload> = guard.slots.values().cloned().collect();
        workloads.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(workloads)
    }

    async fn create(&self, mut workload: Workload) -> Result<Workload> {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        let key = workload.key();
        if guard.key_index.contains_key(&key) {
            return Err(Error::InvalidObject(format!("workload {} already exists", key)));
        }

        if workload.uid.is_none() {
            workload.uid = Some(Uuid::new_v4());
        }
        workload.resource_version = 1;

        let id = guard.slots.insert(workload.clone());
        guard.key_index.insert(key, id);
        Ok(workload)
    }

    async fn update(&self, mut workload: Workload) -> Result<Workload> {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        let key = workload.key();
        let id = *guard.key_index.get(&key).ok_or_else(|| Error::NotFound(format!("workload {}", key)))?;

        let stored = &mut guard.slots[id];
        if stored.resource_version != workload.resource_version {
            return Err(Error::Conflict { key, expected: workload.resource_version, found: stored.resource_version });
        }

        workload.resource_version += 1;
        *stored = workload.clone();
        Ok(workload)
    }

    async fn delete(&self, key: &WorkloadKey) -> Result<()> {
        let mut guard = self.inner.write().expect("RwLock poisoned");
        match guard.key_index.remove(key) {
            Some(id) => {
                guard.slots.remove(id);
                Ok(())
            }
            None => Err(Error::NotFound(format!("workload {}", key))),
        }
    }
}
