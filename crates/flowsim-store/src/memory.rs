use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;
use crate::types::{NewWorkflow, StoredWorkflow, WorkflowPatch};
use crate::WorkflowStore;

/// In-process store. Ids start at 1 and are never reused.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  last_id: i64,
  rows: BTreeMap<i64, StoredWorkflow>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn select(&self, limit: usize, keep: impl Fn(&StoredWorkflow) -> bool) -> Vec<StoredWorkflow> {
    let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    let mut rows: Vec<StoredWorkflow> = inner.rows.values().filter(|w| keep(w)).cloned().collect();
    rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
    rows.truncate(limit);
    rows
  }
}

impl WorkflowStore for MemoryStore {
  type Error = StoreError;

  async fn create(&self, workflow: NewWorkflow) -> Result<StoredWorkflow, Self::Error> {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    inner.last_id += 1;
    let stored = StoredWorkflow::from_new(inner.last_id, workflow);
    inner.rows.insert(stored.id, stored.clone());
    Ok(stored)
  }

  async fn get(&self, id: i64) -> Result<Option<StoredWorkflow>, Self::Error> {
    let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(inner.rows.get(&id).cloned())
  }

  async fn update(
    &self,
    id: i64,
    patch: WorkflowPatch,
  ) -> Result<Option<StoredWorkflow>, Self::Error> {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(inner.rows.get_mut(&id).map(|stored| {
      patch.apply(stored);
      stored.clone()
    }))
  }

  async fn delete(&self, id: i64) -> Result<bool, Self::Error> {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(inner.rows.remove(&id).is_some())
  }

  async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<StoredWorkflow>, Self::Error> {
    Ok(self.select(usize::MAX, |w| w.owner_id == owner_id))
  }

  async fn list_public(&self, limit: usize) -> Result<Vec<StoredWorkflow>, Self::Error> {
    Ok(self.select(limit, |w| w.is_public))
  }

  async fn list_featured(&self, limit: usize) -> Result<Vec<StoredWorkflow>, Self::Error> {
    Ok(self.select(limit, |w| w.is_public && w.is_featured))
  }
}
