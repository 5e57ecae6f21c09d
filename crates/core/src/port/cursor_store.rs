// Scan cursor persistence port

use crate::domain::QueueRange;
use crate::error::Result;
use async_trait::async_trait;

/// Store-backed cursor so every daemon instance sees the same scan position
#[async_trait]
pub trait ScanCursorStore: Send + Sync {
    async fn load_cursor(&self, cursor_key: &str) -> Result<Option<QueueRange>>;

    async fn save_cursor(&self, cursor_key: &str, range: QueueRange) -> Result<()>;
}
