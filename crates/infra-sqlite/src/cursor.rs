// Store-backed scan cursors (one JSON `QueueRange` per consumer and parent queue)

use async_trait::async_trait;
use runqueue_core::domain::QueueRange;
use runqueue_core::error::Result;
use runqueue_core::port::ScanCursorStore;
use tracing::warn;

use crate::sets::{kv_get, kv_set};
use crate::store::SqliteRunQueueStore;

#[async_trait]
impl ScanCursorStore for SqliteRunQueueStore {
    async fn load_cursor(&self, cursor_key: &str) -> Result<Option<QueueRange>> {
        let mut conn = self.acquire().await?;
        let Some(raw) = kv_get(&mut conn, &self.keys.prefixed_key(cursor_key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<QueueRange>(&raw) {
            Ok(range) => Ok(Some(range)),
            Err(e) => {
                // A corrupt cursor restarts the sweep
                warn!(cursor_key = %cursor_key, error = %e, "Discarding unreadable scan cursor");
                Ok(None)
            }
        }
    }

    async fn save_cursor(&self, cursor_key: &str, range: QueueRange) -> Result<()> {
        let now = self.time_provider.now_millis();
        let raw = serde_json::to_string(&range)?;
        let mut conn = self.acquire().await?;
        kv_set(&mut conn, &self.keys.prefixed_key(cursor_key), &raw, now).await
    }
}
