use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{Clock, TtlCache};
use crate::types::{NewWorkflow, StoredWorkflow, WorkflowPatch};
use crate::WorkflowStore;

/// How long listings are served from cache by default.
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Listing {
  Public(usize),
  Featured(usize),
}

/// Caches the public and featured listings of another store.
///
/// Writes made through this wrapper drop every cached listing. Writes that
/// bypass it become visible once the TTL runs out.
pub struct CachedStore<S> {
  inner: S,
  listings: TtlCache<Listing, Vec<StoredWorkflow>>,
}

impl<S: WorkflowStore> CachedStore<S> {
  pub fn new(inner: S) -> Self {
    Self::with_ttl(inner, DEFAULT_LISTING_TTL)
  }

  pub fn with_ttl(inner: S, ttl: Duration) -> Self {
    Self {
      inner,
      listings: TtlCache::new(ttl),
    }
  }

  pub fn with_clock(inner: S, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    Self {
      inner,
      listings: TtlCache::with_clock(ttl, clock),
    }
  }

  pub fn inner(&self) -> &S {
    &self.inner
  }

  async fn listing<F>(&self, key: Listing, load: F) -> Result<Vec<StoredWorkflow>, S::Error>
  where
    F: std::future::Future<Output = Result<Vec<StoredWorkflow>, S::Error>>,
  {
    if let Some(hit) = self.listings.get(&key) {
      debug!(listing = ?key, "listing cache hit");
      return Ok(hit);
    }
    let rows = load.await?;
    self.listings.insert(key, rows.clone());
    Ok(rows)
  }
}

impl<S> WorkflowStore for CachedStore<S>
where
  S: WorkflowStore,
  S::Error: Send,
{
  type Error = S::Error;

  async fn create(&self, workflow: NewWorkflow) -> Result<StoredWorkflow, Self::Error> {
    let stored = self.inner.create(workflow).await?;
    self.listings.clear();
    Ok(stored)
  }

  async fn get(&self, id: i64) -> Result<Option<StoredWorkflow>, Self::Error> {
    self.inner.get(id).await
  }

  async fn update(
    &self,
    id: i64,
    patch: WorkflowPatch,
  ) -> Result<Option<StoredWorkflow>, Self::Error> {
    let updated = self.inner.update(id, patch).await?;
    self.listings.clear();
    Ok(updated)
  }

  async fn delete(&self, id: i64) -> Result<bool, Self::Error> {
    let removed = self.inner.delete(id).await?;
    self.listings.clear();
    Ok(removed)
  }

  async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<StoredWorkflow>, Self::Error> {
    self.inner.list_by_owner(owner_id).await
  }

  async fn list_public(&self, limit: usize) -> Result<Vec<StoredWorkflow>, Self::Error> {
    self
      .listing(Listing::Public(limit), self.inner.list_public(limit))
      .await
  }

  async fn list_featured(&self, limit: usize) -> Result<Vec<StoredWorkflow>, Self::Error> {
    self
      .listing(Listing::Featured(limit), self.inner.list_featured(limit))
      .await
  }
}
