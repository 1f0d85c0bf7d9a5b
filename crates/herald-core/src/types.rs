//! Herald data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An addressable destination on the messaging transport (e.g. a group).
/// The collection is refreshed wholesale on connect, never diffed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    /// Opaque transport identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Member count, when the transport reports one.
    pub member_count: Option<u32>,
}

impl Recipient {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            member_count: None,
        }
    }
}

/// The "latest item" fetched from the content source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentItem {
    /// Source-assigned identifier — the dedup anchor across restarts.
    pub id: String,
    pub title: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A constructed outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    /// Optional media attachment (thumbnail URL).
    pub media_url: Option<String>,
}

impl MessagePayload {
    /// Render the broadcast message for a content item.
    pub fn for_item(item: &ContentItem) -> Self {
        let text = format!(
            "🚨 New on the channel!\n\n🎬 *{}*\n👉 Watch now: {}\n\n📢 Share it around! 🙏",
            item.title, item.url
        );
        Self {
            text,
            media_url: item.thumbnail_url.clone(),
        }
    }

    /// Content hash used to detect duplicate in-flight payloads.
    /// Lives only for the duration of one dispatch — never persisted.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        if let Some(media) = &self.media_url {
            hasher.update(media.as_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Outcome of one end-to-end dispatch. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatchResult {
    /// Recipients with a recorded outcome (success or failure).
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Per-recipient failure reasons.
    pub errors: Vec<(Recipient, String)>,
}

impl DispatchResult {
    /// `attempted == succeeded + failed` must hold on every result.
    pub fn is_consistent(&self) -> bool {
        self.attempted == self.succeeded + self.failed && self.failed == self.errors.len()
    }
}

/// What started a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchTrigger {
    /// Operator pressed the button.
    Manual,
    /// Operator forced a re-send of the current item.
    Forced,
    /// A schedule fired.
    Scheduled,
}

impl std::fmt::Display for DispatchTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchTrigger::Manual => write!(f, "manual"),
            DispatchTrigger::Forced => write!(f, "forced"),
            DispatchTrigger::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Connection lifecycle state. Transitions are driven only by the
/// connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closing,
    /// Terminal until an explicit external trigger: either reconnect
    /// attempts ran out or the transport logged us out.
    Failed,
}

/// Full connection status snapshot, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive reconnect attempts since the last successful connect.
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Pairing QR payload, present only while the transport is waiting
    /// for a scan.
    pub qr_payload: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            retry_count: 0,
            last_error: None,
            qr_payload: None,
        }
    }
}

/// A cron-driven broadcast schedule. Owned by configuration; created and
/// removed by admin operations, independent of connection/dispatch state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleDefinition {
    pub id: String,
    pub name: String,
    /// 5-field cron expression (minute hour day month weekday).
    pub expression: String,
    /// Target recipient ids. Empty means "the currently active selection".
    pub recipients: Vec<String>,
    /// Built-in schedules are protected from removal.
    pub standard: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduleDefinition {
    /// A user-defined schedule with a fresh id.
    pub fn custom(name: &str, expression: &str) -> Self {
        Self {
            id: format!("custom-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            expression: expression.to_string(),
            recipients: Vec::new(),
            standard: false,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    /// A built-in schedule. The id is derived from the expression so the
    /// same definition is recognized across restarts.
    pub fn standard(expression: &str) -> Self {
        let slug: String = expression
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        Self {
            id: format!("standard-{slug}"),
            name: format!("standard broadcast ({expression})"),
            expression: expression.to_string(),
            recipients: Vec::new(),
            standard: true,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Events emitted by the transport collaborator.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Pairing QR payload generated.
    Qr(String),
    /// Connection opened.
    Opened,
    /// Connection closed.
    Closed { reason: CloseReason },
}

/// Why the transport connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Anything except an explicit logout/ban — eligible for reconnect.
    Recoverable(String),
    /// Logged out or banned. Requires manual re-auth.
    LoggedOut,
}

/// Structured status events consumed by the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusEvent {
    Connection(ConnectionStatus),
    RecipientsRefreshed { total: usize },
    DispatchStarted { trigger: DispatchTrigger, item_id: String, recipients: usize },
    DispatchProgress { recipient: Recipient, ok: bool },
    DispatchFinished { trigger: DispatchTrigger, result: DispatchResult },
    DispatchSkipped { trigger: DispatchTrigger, reason: String },
    ScheduleFired { schedule_id: String },
    ScheduleSkipped { schedule_id: String, reason: String },
    LocksCleared,
}
