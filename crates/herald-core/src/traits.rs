//! The two opaque collaborators Herald consumes.
//!
//! The transport's session/auth lifecycle, pairing, and wire protocol are
//! out of scope — Herald only sees this contract. Same for the content
//! source. Concrete adapters live in herald-transport; tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{ContentItem, MessagePayload, Recipient, TransportEvent};

/// Messaging transport client.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Open the session. Completion means the transport accepted the
    /// attempt; the actual Connected/Closed outcome arrives as a
    /// [`TransportEvent`].
    async fn connect(&self) -> Result<()>;

    /// Close the session.
    async fn disconnect(&self) -> Result<()>;

    /// Send one payload to one recipient.
    async fn send_message(&self, recipient_id: &str, payload: &MessagePayload) -> Result<()>;

    /// Fetch the full recipient roster.
    async fn fetch_recipients(&self) -> Result<Vec<Recipient>>;

    /// Subscribe to connection-state and QR events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Content source client — returns the single latest item.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn latest(&self, source_key: &str) -> Result<ContentItem>;
}
