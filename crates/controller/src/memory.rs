//! In-memory [`StorageClient`] for tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use steward_core::{ClientError, Key, ManagedResource, StorageClient};
use steward_store::{Delta, SharedCache};

/// Stores managed resources in a map. Optionally mirrors every write into a
/// cache, standing in for the watch that would observe it.
#[derive(Default)]
pub struct MemoryClient {
    objects: Mutex<FxHashMap<Key, ManagedResource>>,
    injected: Mutex<VecDeque<ClientError>>,
    mirror: Option<SharedCache<ManagedResource>>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryClient {
    pub fn new() -> Self { Self::default() }

    pub fn with_mirror(mirror: SharedCache<ManagedResource>) -> Self {
        Self { mirror: Some(mirror), ..Self::default() }
    }

    /// Seed an object without counting it as a create.
    pub fn insert(&self, obj: ManagedResource) {
        if let Some(m) = &self.mirror {
            m.apply(Delta::Applied(obj.clone()));
        }
        self.objects().insert(obj.key.clone(), obj);
    }

    /// The next call (create, delete or get) fails with `err`. Queued in order.
    pub fn fail_next(&self, err: ClientError) {
        self.injected.lock().unwrap_or_else(PoisonError::into_inner).push_back(err);
    }

    pub fn creates(&self) -> usize { self.creates.load(Ordering::SeqCst) }
    pub fn deletes(&self) -> usize { self.deletes.load(Ordering::SeqCst) }

    pub fn snapshot(&self, key: &Key) -> Option<ManagedResource> { self.objects().get(key).cloned() }
    pub fn len(&self) -> usize { self.objects().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn objects(&self) -> MutexGuard<'_, FxHashMap<Key, ManagedResource>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(&self) -> Result<(), ClientError> {
        match self.injected.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl StorageClient for MemoryClient {
    async fn create(&self, obj: &ManagedResource) -> Result<(), ClientError> {
        self.injected()?;
        {
            let mut objects = self.objects();
            if objects.contains_key(&obj.key) {
                return Err(ClientError::AlreadyExists(obj.key.clone()));
            }
            objects.insert(obj.key.clone(), obj.clone());
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(m) = &self.mirror {
            m.apply(Delta::Applied(obj.clone()));
        }
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), ClientError> {
        self.injected()?;
        let removed = self.objects().remove(key);
        let Some(obj) = removed else { return Err(ClientError::NotFound(key.clone())) };
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if let Some(m) = &self.mirror {
            m.apply(Delta::Deleted(obj));
        }
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<Option<ManagedResource>, ClientError> {
        self.injected()?;
        Ok(self.snapshot(key))
    }
}
