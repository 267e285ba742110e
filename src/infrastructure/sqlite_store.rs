use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::domain::error::{StoreError, SubscriptionError};
use crate::domain::store::{LiveList, Partition, SubscriptionHandle, TaskStore};
use crate::domain::task::{NewTask, Task, TaskId, TaskPatch, TaskSnapshot};

/// SQLite-backed document store with live queries, standing in for the
/// managed cloud store behind the same boundary. Every write publishes
/// the affected partition path on a change bus; each subscription owns
/// a refresher task that re-runs its ordered query when its partition
/// is named.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: Arc<Pool<Sqlite>>,
    changes: broadcast::Sender<String>,
}

impl SqliteTaskStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // A :memory: database exists per connection; keep the pool at
        // one so every query sees the same database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let (changes, _) = broadcast::channel(64);
        Ok(Self { pool: Arc::new(pool), changes })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                partition TEXT NOT NULL,
                title TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '',
                completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&*self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS tasks_partition_created_at
             ON tasks (partition, created_at)",
        )
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn query_snapshot(pool: &Pool<Sqlite>, path: &str) -> Result<TaskSnapshot, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, title, detail, completed, created_at FROM tasks
             WHERE partition = ?1
             ORDER BY created_at DESC, id ASC",
        )
        .bind(path)
        .fetch_all(pool)
        .await?;
        Ok(TaskSnapshot { tasks: rows.into_iter().map(row_to_task).collect() })
    }

    fn notify(&self, partition: &Partition) {
        // No receivers just means nobody is subscribed right now.
        let _ = self.changes.send(partition.path());
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn subscribe(&self, partition: &Partition) -> Result<LiveList, StoreError> {
        let path = partition.path();
        let initial = Self::query_snapshot(&self.pool, &path)
            .await
            .map_err(backend)?;
        let (tx, rx) = watch::channel(Ok(initial));

        let mut bus = self.changes.subscribe();
        let pool = self.pool.clone();
        let refresher = tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(changed) if changed == path => {}
                    Ok(_) => continue,
                    // A lagged receiver only means we may refresh late;
                    // the next query is always the full current set.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                match Self::query_snapshot(&pool, &path).await {
                    Ok(snapshot) => {
                        if tx.send(Ok(snapshot)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(SubscriptionError { reason: err.to_string() }));
                        break;
                    }
                }
            }
        });

        let abort = refresher.abort_handle();
        Ok(LiveList { snapshots: rx, handle: SubscriptionHandle::new(move || abort.abort()) })
    }

    async fn insert(&self, partition: &Partition, new: NewTask) -> Result<TaskId, StoreError> {
        let id = TaskId(Uuid::new_v4());
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO tasks (id, partition, title, detail, completed, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        )
        .bind(id.0.to_string())
        .bind(partition.path())
        .bind(&new.title)
        .bind(&new.detail)
        .bind(now.to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(backend)?;
        self.notify(partition);
        Ok(id)
    }

    async fn update(
        &self,
        partition: &Partition,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            "SELECT title, detail, completed FROM tasks WHERE partition = ?1 AND id = ?2",
        )
        .bind(partition.path())
        .bind(id.0.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend)?;
        let Some(row) = row else { return Err(StoreError::NotFound) };

        let title = patch.title.unwrap_or_else(|| row.get("title"));
        let detail = patch.detail.unwrap_or_else(|| row.get("detail"));
        let completed = patch.completed.unwrap_or_else(|| row.get("completed"));

        sqlx::query(
            "UPDATE tasks SET title = ?3, detail = ?4, completed = ?5
             WHERE partition = ?1 AND id = ?2",
        )
        .bind(partition.path())
        .bind(id.0.to_string())
        .bind(title)
        .bind(detail)
        .bind(completed)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;
        self.notify(partition);
        Ok(())
    }

    async fn remove(&self, partition: &Partition, id: TaskId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE partition = ?1 AND id = ?2")
            .bind(partition.path())
            .bind(id.0.to_string())
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.notify(partition);
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn row_to_task(row: SqliteRow) -> Task {
    let id_str: String = row.get("id");
    let created_at_str: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .unwrap()
        .with_timezone(&Utc);
    Task {
        id: TaskId(Uuid::parse_str(&id_str).unwrap()),
        title: row.get("title"),
        detail: row.get("detail"),
        completed: row.get("completed"),
        created_at,
    }
}
