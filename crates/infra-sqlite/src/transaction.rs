// Immediate (write-locking) SQLite transaction

use runqueue_core::error::{AppError, Result};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::warn;

use crate::error::map_sqlx_error;

/// Transaction opened with `BEGIN IMMEDIATE`.
///
/// The write lock is taken up front, so a read-check-write sequence inside it can never
/// interleave with another writer (busy writers wait on the busy timeout instead of
/// failing a lock upgrade). A guard dropped without [`finish`](Self::finish) detaches its
/// connection from the pool, discarding the open transaction.
pub(crate) struct ImmediateTransaction {
    conn: Option<PoolConnection<Sqlite>>,
    open: bool,
}

impl ImmediateTransaction {
    pub async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await.map_err(map_sqlx_error)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self {
            conn: Some(conn),
            open: true,
        })
    }

    pub fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| AppError::Internal("transaction connection released".to_string()))
    }

    /// Commit on `Ok`, roll back on `Err`; passes `result` through
    pub async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.execute("COMMIT").await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.execute("ROLLBACK").await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn execute(&mut self, statement: &str) -> Result<()> {
        let conn = self.conn()?;
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        self.open = false;
        Ok(())
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if self.open {
            if let Some(conn) = self.conn.take() {
                // Closing the connection discards the uncommitted transaction
                drop(conn.detach());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM key_values")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn insert(conn: &mut SqliteConnection, key: &str) -> Result<()> {
        sqlx::query("INSERT INTO key_values (key, value, updated_at) VALUES (?, '1', 0)")
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_on_ok() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let mut tx = ImmediateTransaction::begin(&pool).await.unwrap();
        let result = insert(tx.conn().unwrap(), "a").await;
        tx.finish(result).await.unwrap();

        assert_eq!(count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_on_err() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let mut tx = ImmediateTransaction::begin(&pool).await.unwrap();
        let result = async {
            insert(tx.conn()?, "a").await?;
            Err::<(), _>(AppError::Conflict("abort".to_string()))
        }
        .await;
        assert!(tx.finish(result).await.is_err());

        assert_eq!(count(&pool).await, 0);
    }
}
