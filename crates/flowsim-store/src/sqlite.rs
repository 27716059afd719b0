use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

use crate::error::StoreError;
use crate::types::{NewWorkflow, StoredWorkflow, WorkflowPatch};
use crate::WorkflowStore;

const COLUMNS: &str = "id, owner_id, name, description, nodes, complexity_score, is_public, is_featured, created_at, updated_at";

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path.as_ref())
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// A migrated private in-memory database.
  ///
  /// Every connection to `:memory:` sees its own database, so the pool is
  /// capped at one connection.
  pub async fn in_memory() -> Result<Self, StoreError> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  async fn write(&self, stored: &StoredWorkflow) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      UPDATE workflows
      SET name = ?, description = ?, nodes = ?, complexity_score = ?, is_public = ?, is_featured = ?, updated_at = ?
      WHERE id = ?
      "#,
    )
    .bind(&stored.name)
    .bind(&stored.description)
    .bind(&stored.nodes)
    .bind(stored.complexity_score)
    .bind(stored.is_public)
    .bind(stored.is_featured)
    .bind(stored.updated_at)
    .bind(stored.id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn select(&self, filter: &str, limit: usize, bind: Option<i64>) -> Result<Vec<StoredWorkflow>, StoreError> {
    // julianday() compares timestamps numerically; the stored text has a
    // variable number of fractional digits.
    let sql = format!(
      "SELECT {COLUMNS} FROM workflows WHERE {filter} ORDER BY julianday(updated_at) DESC, id DESC LIMIT ?"
    );
    let mut query = sqlx::query_as::<_, StoredWorkflow>(&sql);
    if let Some(value) = bind {
      query = query.bind(value);
    }
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    Ok(query.bind(limit).fetch_all(&self.pool).await?)
  }
}

impl WorkflowStore for SqliteStore {
  type Error = StoreError;

  async fn create(&self, workflow: NewWorkflow) -> Result<StoredWorkflow, Self::Error> {
    let mut stored = StoredWorkflow::from_new(0, workflow);
    let result = sqlx::query(
      r#"
      INSERT INTO workflows (owner_id, name, description, nodes, complexity_score, is_public, is_featured, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(stored.owner_id)
    .bind(&stored.name)
    .bind(&stored.description)
    .bind(&stored.nodes)
    .bind(stored.complexity_score)
    .bind(stored.is_public)
    .bind(stored.is_featured)
    .bind(stored.created_at)
    .bind(stored.updated_at)
    .execute(&self.pool)
    .await?;

    stored.id = result.last_insert_rowid();
    debug!(workflow_id = stored.id, owner_id = stored.owner_id, "workflow stored");
    Ok(stored)
  }

  async fn get(&self, id: i64) -> Result<Option<StoredWorkflow>, Self::Error> {
    let sql = format!("SELECT {COLUMNS} FROM workflows WHERE id = ?");
    Ok(
      sqlx::query_as::<_, StoredWorkflow>(&sql)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn update(
    &self,
    id: i64,
    patch: WorkflowPatch,
  ) -> Result<Option<StoredWorkflow>, Self::Error> {
    let Some(mut stored) = self.get(id).await? else {
      return Ok(None);
    };
    patch.apply(&mut stored);
    self.write(&stored).await?;
    Ok(Some(stored))
  }

  async fn delete(&self, id: i64) -> Result<bool, Self::Error> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<StoredWorkflow>, Self::Error> {
    self.select("owner_id = ?", usize::MAX, Some(owner_id)).await
  }

  async fn list_public(&self, limit: usize) -> Result<Vec<StoredWorkflow>, Self::Error> {
    self.select("is_public = 1", limit, None).await
  }

  async fn list_featured(&self, limit: usize) -> Result<Vec<StoredWorkflow>, Self::Error> {
    self.select("is_public = 1 AND is_featured = 1", limit, None).await
  }
}
