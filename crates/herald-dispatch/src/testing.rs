//! In-memory fakes for the transport and content source contracts,
//! shared by the unit tests in this crate.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use herald_core::error::{HeraldError, Result};
use herald_core::traits::{ContentSource, Transport};
use herald_core::types::{CloseReason, ContentItem, MessagePayload, Recipient, TransportEvent};

pub struct MockTransport {
    events: broadcast::Sender<TransportEvent>,
    pub connect_calls: AtomicUsize,
    /// Recipient ids in send order.
    pub sends: Mutex<Vec<String>>,
    /// Ids whose sends fail with a per-recipient error.
    pub fail_on: Mutex<HashSet<String>>,
    /// Id whose send fails with a connection-level error.
    pub drop_connection_on: Mutex<Option<String>>,
    /// Id whose send never completes (exercises the send timeout).
    pub hang_on: Mutex<Option<String>>,
    /// When set, connect() itself returns a transport error.
    pub fail_connect: AtomicBool,
    pub recipients: Mutex<Vec<Recipient>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            connect_calls: AtomicUsize::new(0),
            sends: Mutex::new(Vec::new()),
            fail_on: Mutex::new(HashSet::new()),
            drop_connection_on: Mutex::new(None),
            hang_on: Mutex::new(None),
            fail_connect: AtomicBool::new(false),
            recipients: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_for(&self, id: &str) {
        self.fail_on.lock().unwrap().insert(id.to_string());
    }

    pub fn emit_opened(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    pub fn emit_closed(&self, reason: CloseReason) {
        let _ = self.events.send(TransportEvent::Closed { reason });
    }

    pub fn emit_qr(&self, payload: &str) {
        let _ = self.events.send(TransportEvent::Qr(payload.to_string()));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(HeraldError::Transport("mock connect refused".into()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn send_message(&self, recipient_id: &str, _payload: &MessagePayload) -> Result<()> {
        if self.hang_on.lock().unwrap().as_deref() == Some(recipient_id) {
            // Far longer than any send timeout in the tests.
            tokio::time::sleep(std::time::Duration::from_secs(86400)).await;
        }
        self.sends.lock().unwrap().push(recipient_id.to_string());
        if self.drop_connection_on.lock().unwrap().as_deref() == Some(recipient_id) {
            return Err(HeraldError::Send {
                recipient: recipient_id.to_string(),
                reason: "stream reset".into(),
                connection_lost: true,
            });
        }
        if self.fail_on.lock().unwrap().contains(recipient_id) {
            return Err(HeraldError::Send {
                recipient: recipient_id.to_string(),
                reason: "rejected by transport".into(),
                connection_lost: false,
            });
        }
        Ok(())
    }

    async fn fetch_recipients(&self) -> Result<Vec<Recipient>> {
        Ok(self.recipients.lock().unwrap().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

pub struct MockSource {
    pub item: Mutex<ContentItem>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    /// When set, latest() never resolves (exercises the fetch timeout).
    pub hang: AtomicBool,
}

impl MockSource {
    pub fn with_item(id: &str, title: &str) -> Self {
        Self {
            item: Mutex::new(ContentItem {
                id: id.to_string(),
                title: title.to_string(),
                url: format!("https://example.com/watch?v={id}"),
                thumbnail_url: None,
                published_at: None,
            }),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
        }
    }

    pub fn set_item(&self, id: &str, title: &str) {
        let mut item = self.item.lock().unwrap();
        item.id = id.to_string();
        item.title = title.to_string();
        item.url = format!("https://example.com/watch?v={id}");
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn latest(&self, _source_key: &str) -> Result<ContentItem> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HeraldError::Fetch("mock source down".into()));
        }
        Ok(self.item.lock().unwrap().clone())
    }
}

pub fn recipients(n: usize) -> Vec<Recipient> {
    (1..=n)
        .map(|i| Recipient::new(&format!("g{i}"), &format!("Group {i}")))
        .collect()
}
