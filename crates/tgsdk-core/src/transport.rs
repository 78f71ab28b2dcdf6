use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Hexagonal port for the long-poll fetch and cursor-advance calls.
///
/// The dispatch engine never constructs HTTP itself; `tgsdk-http` implements
/// this trait against the Bot API and tests script it with fakes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Long-poll for raw update records starting at `offset`.
    ///
    /// `offset` is `None` on the first call so the service resumes from its
    /// own retained cursor. A response with `ok: false` surfaces as
    /// [`crate::Error::Transport`].
    async fn fetch(&self, offset: Option<i64>, limit: i64, timeout: i64) -> Result<Vec<Value>>;

    /// Move the server-side cursor to `offset`; called purely for its side
    /// effect. Updates below `offset` will not be redelivered.
    async fn advance(&self, offset: i64) -> Result<()>;

    /// Remove any registered webhook. Polling and webhook delivery are
    /// mutually exclusive at the service, so the engine calls this before
    /// its first fetch.
    async fn remove_webhook(&self) -> Result<()>;
}
