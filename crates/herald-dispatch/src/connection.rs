//! Connection lifecycle management.
//!
//! Owns the transport state machine and the reconnect policy. State
//! transitions are driven only from here; everyone else observes them
//! through a watch channel or the status bus.
//!
//! Reconnect policy: an unexpected close with a recoverable reason
//! schedules another attempt after `min(base * attempt, max)`. An
//! explicit logout/ban is terminal — the operator has to re-authenticate.
//! After `max_attempts` consecutive failures the manager parks in Failed
//! and waits for an explicit connect().

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use herald_core::config::ConnectionConfig;
use herald_core::error::{HeraldError, Result};
use herald_core::traits::Transport;
use herald_core::types::{
    CloseReason, ConnectionState, ConnectionStatus, Recipient, StatusEvent, TransportEvent,
};

use crate::events::StatusBus;
use crate::locks::LockRegistry;

/// The one backoff policy used for all reconnects. Unit-testable without
/// any network code.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay before attempt `attempt` (1-based). Non-decreasing, capped.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        self.base
            .checked_mul(attempt)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

enum Begin {
    AlreadyConnected,
    JoinInFlight,
    Started,
    Rejected,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    locks: Arc<LockRegistry>,
    bus: StatusBus,
    backoff: BackoffPolicy,
    max_attempts: u32,
    status_tx: watch::Sender<ConnectionStatus>,
    logged_out: AtomicBool,
    roster: std::sync::RwLock<Vec<Recipient>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        locks: Arc<LockRegistry>,
        bus: StatusBus,
        config: &ConnectionConfig,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Arc::new(Self {
            transport,
            locks,
            bus,
            backoff: BackoffPolicy::from_config(config),
            max_attempts: config.max_attempts,
            status_tx,
            logged_out: AtomicBool::new(false),
            roster: std::sync::RwLock::new(Vec::new()),
        })
    }

    /// Start consuming transport events. Call exactly once after
    /// construction.
    pub fn spawn_event_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mgr = Arc::clone(self);
        tokio::spawn(async move { mgr.event_loop().await })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_tx.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel for state observation (scheduler, batch sender).
    pub fn status_rx(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Last known recipient roster, refreshed wholesale on connect.
    pub fn recipients(&self) -> Vec<Recipient> {
        self.roster.read().unwrap().clone()
    }

    /// Open the connection and wait for the attempt's outcome.
    ///
    /// Concurrent calls while an attempt is in flight do not start a new
    /// one — they await the existing attempt's eventual result.
    pub async fn connect(&self) -> Result<()> {
        let rx = self.status_tx.subscribe();
        let mut begin = Begin::Rejected;
        self.status_tx.send_if_modified(|status| match status.state {
            ConnectionState::Connected => {
                begin = Begin::AlreadyConnected;
                false
            }
            ConnectionState::Connecting => {
                begin = Begin::JoinInFlight;
                false
            }
            ConnectionState::Closing => {
                begin = Begin::Rejected;
                false
            }
            ConnectionState::Idle | ConnectionState::Failed => {
                begin = Begin::Started;
                status.state = ConnectionState::Connecting;
                status.retry_count = 0;
                status.last_error = None;
                true
            }
        });

        match begin {
            Begin::AlreadyConnected => {
                tracing::debug!("connect(): already connected");
                Ok(())
            }
            Begin::JoinInFlight => {
                tracing::debug!("connect(): joining in-flight attempt");
                self.wait_for_outcome(rx).await
            }
            Begin::Rejected => Err(HeraldError::Transport(
                "connection is shutting down".into(),
            )),
            Begin::Started => {
                // Explicit connect is the manual re-auth trigger.
                self.logged_out.store(false, Ordering::SeqCst);
                self.emit_connection();
                tracing::info!("🔌 connecting transport '{}'", self.transport.name());
                if let Err(e) = self.transport.connect().await {
                    self.fail(&e.to_string(), e.is_terminal());
                    return Err(e);
                }
                self.wait_for_outcome(rx).await
            }
        }
    }

    /// Close the connection deliberately.
    pub async fn disconnect(&self) -> Result<()> {
        self.update(|s| {
            s.state = ConnectionState::Closing;
            s.qr_payload = None;
        });
        let result = self.transport.disconnect().await;
        self.update(|s| {
            s.state = ConnectionState::Idle;
            s.retry_count = 0;
        });
        self.locks.clear_all();
        self.bus.emit(StatusEvent::LocksCleared);
        tracing::info!("🔌 transport disconnected");
        result
    }

    /// Connected: Ok. Connecting: await the in-flight attempt. Anything
    /// else fails — a dispatch never triggers pairing by itself.
    pub async fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting => {
                self.wait_for_outcome(self.status_tx.subscribe()).await
            }
            // A logout is terminal, not "retry later": the caller must
            // know re-auth is required.
            _ if self.logged_out.load(Ordering::SeqCst) => {
                let msg = self
                    .status()
                    .last_error
                    .unwrap_or_else(|| "logged out".into());
                Err(HeraldError::LoggedOut(msg))
            }
            _ => Err(HeraldError::NotConnected),
        }
    }

    /// Re-fetch the recipient roster wholesale.
    pub async fn refresh_recipients(&self) -> Result<usize> {
        let fetched = self.transport.fetch_recipients().await?;
        let total = fetched.len();
        *self.roster.write().unwrap() = fetched;
        self.bus.emit(StatusEvent::RecipientsRefreshed { total });
        tracing::info!("👥 {total} recipients loaded");
        Ok(total)
    }

    async fn wait_for_outcome(&self, mut rx: watch::Receiver<ConnectionStatus>) -> Result<()> {
        loop {
            let (state, last_error) = {
                let status = rx.borrow_and_update();
                (status.state, status.last_error.clone())
            };
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => {
                    let msg = last_error.unwrap_or_else(|| "connection failed".into());
                    return if self.logged_out.load(Ordering::SeqCst) {
                        Err(HeraldError::LoggedOut(msg))
                    } else {
                        Err(HeraldError::Transport(msg))
                    };
                }
                ConnectionState::Idle | ConnectionState::Closing => {
                    return Err(HeraldError::Transport("connection closed".into()));
                }
                ConnectionState::Connecting => {
                    if rx.changed().await.is_err() {
                        return Err(HeraldError::Transport("connection manager gone".into()));
                    }
                }
            }
        }
    }

    async fn event_loop(&self) {
        let mut events = self.transport.subscribe();
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("transport event stream lagged by {n}");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Qr(payload) => {
                tracing::info!("📷 pairing QR generated");
                self.update(|s| s.qr_payload = Some(payload));
            }
            TransportEvent::Opened => {
                self.update(|s| {
                    s.state = ConnectionState::Connected;
                    s.retry_count = 0;
                    s.last_error = None;
                    s.qr_payload = None;
                });
                tracing::info!("✅ transport connected");
                if let Err(e) = self.refresh_recipients().await {
                    tracing::warn!("⚠️ recipient refresh failed: {e}");
                }
            }
            TransportEvent::Closed { reason } => {
                // In-flight sends on a dead connection cannot be trusted
                // to complete and release their locks.
                self.locks.clear_all();
                self.bus.emit(StatusEvent::LocksCleared);
                match reason {
                    CloseReason::LoggedOut => {
                        tracing::error!("⛔ transport logged out — manual re-auth required");
                        self.fail("logged out by transport", true);
                    }
                    CloseReason::Recoverable(msg) => {
                        let state = self.state();
                        if state == ConnectionState::Closing || state == ConnectionState::Idle {
                            // Expected close after a manual disconnect.
                            self.update(|s| {
                                s.state = ConnectionState::Idle;
                                s.qr_payload = None;
                            });
                        } else {
                            tracing::warn!("🔁 connection lost: {msg}");
                            self.reconnect_with_backoff(msg).await;
                        }
                    }
                }
            }
        }
    }

    async fn reconnect_with_backoff(&self, mut reason: String) {
        loop {
            let attempt = self.status().retry_count + 1;
            if attempt > self.max_attempts {
                self.fail(
                    &format!("gave up after {} reconnect attempts: {reason}", self.max_attempts),
                    false,
                );
                return;
            }
            self.update(|s| {
                s.state = ConnectionState::Connecting;
                s.retry_count = attempt;
                s.last_error = Some(reason.clone());
            });
            let delay = self.backoff.next_delay(attempt);
            tracing::info!(
                "🔁 reconnect attempt {attempt}/{} in {delay:?}",
                self.max_attempts
            );
            tokio::time::sleep(delay).await;
            if self.state() != ConnectionState::Connecting {
                // Canceled by a manual disconnect while we slept.
                return;
            }
            match self.transport.connect().await {
                // Outcome arrives as an Opened or Closed event.
                Ok(()) => return,
                Err(e) if e.is_terminal() => {
                    self.fail(&e.to_string(), true);
                    return;
                }
                Err(e) => {
                    reason = e.to_string();
                }
            }
        }
    }

    fn fail(&self, msg: &str, terminal_logout: bool) {
        if terminal_logout {
            self.logged_out.store(true, Ordering::SeqCst);
        }
        self.update(|s| {
            s.state = ConnectionState::Failed;
            s.last_error = Some(msg.to_string());
            s.qr_payload = None;
        });
        tracing::error!("❌ connection failed: {msg}");
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionStatus)) {
        self.status_tx.send_modify(f);
        self.emit_connection();
    }

    fn emit_connection(&self) {
        self.bus.emit(StatusEvent::Connection(self.status()));
    }
}
