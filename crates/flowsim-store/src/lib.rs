//! Flowsim Store
//!
//! Persistence for authored workflow definitions, plus a TTL cache for the
//! public and featured listings.
//!
//! The [`WorkflowStore`] trait defines operations for:
//! - Creating, reading, updating and deleting definitions by id
//! - Listing an owner's definitions, most recently updated first
//! - Listing public and featured definitions
//!
//! [`SqliteStore`] persists to SQLite through sqlx; [`MemoryStore`] keeps
//! everything in process. [`CachedStore`] wraps either.

mod cache;
mod cached;
mod error;
mod memory;
mod sqlite;
mod types;

pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use cached::{CachedStore, DEFAULT_LISTING_TTL};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{NewWorkflow, StoredWorkflow, WorkflowPatch, complexity_score};

/// Default page size for [`WorkflowStore::list_public`].
pub const PUBLIC_LIMIT: usize = 10;
/// Default page size for [`WorkflowStore::list_featured`].
pub const FEATURED_LIMIT: usize = 6;

/// Storage trait for workflow definitions.
pub trait WorkflowStore: Send + Sync {
  /// Error type for storage operations.
  type Error;

  /// Store a new definition and return it with its assigned id.
  fn create(
    &self,
    workflow: NewWorkflow,
  ) -> impl std::future::Future<Output = Result<StoredWorkflow, Self::Error>> + Send;

  fn get(
    &self,
    id: i64,
  ) -> impl std::future::Future<Output = Result<Option<StoredWorkflow>, Self::Error>> + Send;

  /// Apply a patch. Returns `None` if no definition has this id.
  fn update(
    &self,
    id: i64,
    patch: WorkflowPatch,
  ) -> impl std::future::Future<Output = Result<Option<StoredWorkflow>, Self::Error>> + Send;

  /// Returns whether a definition was removed.
  fn delete(&self, id: i64) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send;

  /// Every definition owned by `owner_id`, most recently updated first.
  fn list_by_owner(
    &self,
    owner_id: i64,
  ) -> impl std::future::Future<Output = Result<Vec<StoredWorkflow>, Self::Error>> + Send;

  /// Public definitions, most recently updated first.
  fn list_public(
    &self,
    limit: usize,
  ) -> impl std::future::Future<Output = Result<Vec<StoredWorkflow>, Self::Error>> + Send;

  /// Definitions that are both public and featured, most recently updated first.
  fn list_featured(
    &self,
    limit: usize,
  ) -> impl std::future::Future<Output = Result<Vec<StoredWorkflow>, Self::Error>> + Send;
}
