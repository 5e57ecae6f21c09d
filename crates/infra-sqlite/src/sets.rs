// Sorted-set, set and scalar primitives over SQLite tables.
//
// All helpers take fully prefixed keys and run on the caller's connection, so they
// compose inside one immediate transaction.

use runqueue_core::error::Result;
use sqlx::SqliteConnection;

use crate::error::map_sqlx_error;

// ----------------------------------------------------------------------
// Sorted sets
// ----------------------------------------------------------------------

/// Add or re-score a member
pub(crate) async fn zadd(
    conn: &mut SqliteConnection,
    set_key: &str,
    member: &str,
    score: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sorted_set_members (set_key, member, score) VALUES (?, ?, ?)
        ON CONFLICT (set_key, member) DO UPDATE SET score = excluded.score
        "#,
    )
    .bind(set_key)
    .bind(member)
    .bind(score)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Remove a member; true if it was present
pub(crate) async fn zrem(conn: &mut SqliteConnection, set_key: &str, member: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sorted_set_members WHERE set_key = ? AND member = ?")
        .bind(set_key)
        .bind(member)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn zcard(conn: &mut SqliteConnection, set_key: &str) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sorted_set_members WHERE set_key = ?")
        .bind(set_key)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(count.max(0) as u64)
}

pub(crate) async fn zmin_score(conn: &mut SqliteConnection, set_key: &str) -> Result<Option<i64>> {
    let score: Option<i64> =
        sqlx::query_scalar("SELECT MIN(score) FROM sorted_set_members WHERE set_key = ?")
            .bind(set_key)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    Ok(score)
}

/// Lowest-scored member with `score <= max_score` (ties by member)
pub(crate) async fn zfirst_visible(
    conn: &mut SqliteConnection,
    set_key: &str,
    max_score: i64,
) -> Result<Option<(String, i64)>> {
    let row: Option<(String, i64)> = sqlx::query_as(
        r#"
        SELECT member, score FROM sorted_set_members
        WHERE set_key = ? AND score <= ?
        ORDER BY score ASC, member ASC
        LIMIT 1
        "#,
    )
    .bind(set_key)
    .bind(max_score)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row)
}

// ----------------------------------------------------------------------
// Sets
// ----------------------------------------------------------------------

/// Add a member; true if it was not present
pub(crate) async fn sadd(conn: &mut SqliteConnection, set_key: &str, member: &str) -> Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO set_members (set_key, member) VALUES (?, ?)")
        .bind(set_key)
        .bind(member)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}

/// Remove a member; true if it was present
pub(crate) async fn srem(conn: &mut SqliteConnection, set_key: &str, member: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM set_members WHERE set_key = ? AND member = ?")
        .bind(set_key)
        .bind(member)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn scard(conn: &mut SqliteConnection, set_key: &str) -> Result<u32> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM set_members WHERE set_key = ?")
        .bind(set_key)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(count.clamp(0, u32::MAX as i64) as u32)
}

pub(crate) async fn smembers(conn: &mut SqliteConnection, set_key: &str) -> Result<Vec<String>> {
    let members: Vec<String> =
        sqlx::query_scalar("SELECT member FROM set_members WHERE set_key = ? ORDER BY member")
            .bind(set_key)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    Ok(members)
}

// ----------------------------------------------------------------------
// Scalars
// ----------------------------------------------------------------------

pub(crate) async fn kv_get(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM key_values WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(value)
}

pub(crate) async fn kv_set(
    conn: &mut SqliteConnection,
    key: &str,
    value: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO key_values (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

pub(crate) async fn kv_delete(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM key_values WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    #[tokio::test]
    async fn test_sorted_set_ordering() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        zadd(&mut conn, "lane", "b", 20).await.unwrap();
        zadd(&mut conn, "lane", "a", 20).await.unwrap();
        zadd(&mut conn, "lane", "c", 30).await.unwrap();

        assert_eq!(zcard(&mut conn, "lane").await.unwrap(), 3);
        assert_eq!(zmin_score(&mut conn, "lane").await.unwrap(), Some(20));
        // Score ties resolve by member
        assert_eq!(
            zfirst_visible(&mut conn, "lane", 25).await.unwrap(),
            Some(("a".to_string(), 20))
        );
        assert_eq!(zfirst_visible(&mut conn, "lane", 10).await.unwrap(), None);

        // Re-score moves the member
        zadd(&mut conn, "lane", "a", 40).await.unwrap();
        assert_eq!(
            zfirst_visible(&mut conn, "lane", 100).await.unwrap(),
            Some(("b".to_string(), 20))
        );

        assert!(zrem(&mut conn, "lane", "b").await.unwrap());
        assert!(!zrem(&mut conn, "lane", "b").await.unwrap());
        assert_eq!(zmin_score(&mut conn, "empty").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_membership() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        assert!(sadd(&mut conn, "s", "m1").await.unwrap());
        assert!(!sadd(&mut conn, "s", "m1").await.unwrap());
        assert!(sadd(&mut conn, "s", "m2").await.unwrap());
        assert_eq!(scard(&mut conn, "s").await.unwrap(), 2);
        assert_eq!(smembers(&mut conn, "s").await.unwrap(), vec!["m1", "m2"]);

        assert!(srem(&mut conn, "s", "m1").await.unwrap());
        assert!(!srem(&mut conn, "s", "m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_key_values() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(kv_get(&mut conn, "k").await.unwrap(), None);
        kv_set(&mut conn, "k", "5", 1).await.unwrap();
        kv_set(&mut conn, "k", "7", 2).await.unwrap();
        assert_eq!(kv_get(&mut conn, "k").await.unwrap().as_deref(), Some("7"));
        assert!(kv_delete(&mut conn, "k").await.unwrap());
        assert!(!kv_delete(&mut conn, "k").await.unwrap());
    }
}
