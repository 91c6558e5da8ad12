use async_trait::async_trait;
use bus_common::Message;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{Category, JournalEntry, JournalFilter};

/// Append-only journal store contract (C6). Write-once per entry: no
/// updates, no deletes from the engine side.
#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn append(
        &self,
        category: Category,
        topic: Option<String>,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<JournalEntry>;

    /// Entries after `after` (exclusive; `None` means from the start)
    /// matching `filter`, plus the cursor a follow-up call should pass as
    /// `after` to continue reading.
    async fn read(
        &self,
        after: Option<String>,
        filter: JournalFilter,
        cancel: &CancellationToken,
    ) -> Result<(Vec<JournalEntry>, Option<String>)>;
}
