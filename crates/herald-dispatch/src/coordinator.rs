//! The dispatch pipeline.
//!
//! One entry point, [`Coordinator::dispatch`], shared by manual triggers
//! and the scheduler. The pipeline is strictly ordered: global lock,
//! connection check, content fetch, dedup check, fingerprint lock,
//! per-recipient locks, batch send, anchor persist. Every lock is an
//! RAII guard, so an error anywhere in the middle releases everything
//! acquired so far.

use std::sync::Arc;

use herald_core::error::{HeraldError, Result};
use herald_core::store::StateStore;
use herald_core::types::{
    DispatchResult, DispatchTrigger, MessagePayload, Recipient, StatusEvent,
};

use crate::batch::BatchSender;
use crate::cache::ContentCache;
use crate::connection::ConnectionManager;
use crate::events::StatusBus;
use crate::locks::{GLOBAL_KEY, LockRegistry, LockScope};

/// How a dispatch was requested.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub trigger: DispatchTrigger,
    /// Explicit target recipient ids. `None` broadcasts to the active
    /// selection from the state store.
    pub recipient_ids: Option<Vec<String>>,
}

impl DispatchOptions {
    pub fn manual() -> Self {
        Self {
            trigger: DispatchTrigger::Manual,
            recipient_ids: None,
        }
    }

    /// Re-send the current item even if it was already dispatched.
    pub fn forced() -> Self {
        Self {
            trigger: DispatchTrigger::Forced,
            recipient_ids: None,
        }
    }

    /// A schedule firing. An empty id list means "the active selection".
    pub fn scheduled(recipient_ids: Vec<String>) -> Self {
        Self {
            trigger: DispatchTrigger::Scheduled,
            recipient_ids: if recipient_ids.is_empty() {
                None
            } else {
                Some(recipient_ids)
            },
        }
    }
}

pub struct Coordinator {
    connection: Arc<ConnectionManager>,
    cache: Arc<ContentCache>,
    batch: BatchSender,
    locks: Arc<LockRegistry>,
    store: Arc<StateStore>,
    bus: StatusBus,
    /// Key passed to the content source ("which channel to watch").
    source_key: String,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: Arc<ConnectionManager>,
        cache: Arc<ContentCache>,
        batch: BatchSender,
        locks: Arc<LockRegistry>,
        store: Arc<StateStore>,
        bus: StatusBus,
        source_key: &str,
    ) -> Self {
        Self {
            connection,
            cache,
            batch,
            locks,
            store,
            bus,
            source_key: source_key.to_string(),
        }
    }

    /// Run one broadcast end to end.
    ///
    /// Fails fast with [`HeraldError::LockContention`] when another
    /// dispatch is in flight, and with [`HeraldError::NothingNew`] when
    /// the latest item was already broadcast and the trigger is not
    /// forced.
    pub async fn dispatch(&self, opts: DispatchOptions) -> Result<DispatchResult> {
        let trigger = opts.trigger;

        let Some(_global) = self.locks.try_acquire_guard(LockScope::Global, GLOBAL_KEY) else {
            return Err(self.skip(trigger, "another dispatch is already running"));
        };

        self.connection.ensure_connected().await?;

        let force = trigger == DispatchTrigger::Forced;
        let item = self.cache.get_latest(&self.source_key, force).await?;

        if !force && self.store.last_item_id().as_deref() == Some(item.id.as_str()) {
            self.bus.emit(StatusEvent::DispatchSkipped {
                trigger,
                reason: "no new item".into(),
            });
            tracing::info!("📭 nothing new: '{}' was already broadcast", item.id);
            return Err(HeraldError::NothingNew);
        }

        let payload = MessagePayload::for_item(&item);
        let Some(_fingerprint) = self
            .locks
            .try_acquire_guard(LockScope::Fingerprint, &payload.fingerprint())
        else {
            return Err(self.skip(trigger, "an identical payload is already in flight"));
        };

        let candidates = self.resolve_targets(opts.recipient_ids);
        if candidates.is_empty() {
            return Err(HeraldError::Config(
                "no recipients selected for broadcast".into(),
            ));
        }

        // Recipients mid-send in another dispatch are skipped, not waited
        // on. Guards are held until the batch completes.
        let mut guards = Vec::new();
        let mut targets = Vec::new();
        for recipient in candidates {
            match self
                .locks
                .try_acquire_guard(LockScope::Recipient, &recipient.id)
            {
                Some(guard) => {
                    guards.push(guard);
                    targets.push(recipient);
                }
                None => {
                    tracing::warn!("⏭️ recipient '{}' busy, skipping", recipient.name);
                }
            }
        }
        if targets.is_empty() {
            return Err(self.skip(trigger, "all selected recipients are busy"));
        }

        self.bus.emit(StatusEvent::DispatchStarted {
            trigger,
            item_id: item.id.clone(),
            recipients: targets.len(),
        });
        tracing::info!(
            "📣 {trigger} dispatch of '{}' to {} recipient(s)",
            item.title,
            targets.len()
        );

        let result = self.batch.send(&targets, &payload).await;
        drop(guards);

        // The anchor moves only when something actually went out, so a
        // fully failed dispatch can be retried without forcing.
        if result.succeeded > 0 && self.store.last_item_id().as_deref() != Some(item.id.as_str())
        {
            self.store.set_last_item_id(&item.id)?;
        }

        tracing::info!(
            "✅ dispatch finished: {}/{} sent, {} failed",
            result.succeeded,
            result.attempted,
            result.failed
        );
        self.bus.emit(StatusEvent::DispatchFinished {
            trigger,
            result: result.clone(),
        });
        Ok(result)
    }

    /// Map explicit ids (or the stored active selection) onto the known
    /// roster. Ids the roster does not know are still addressed — the
    /// transport is the authority on whether they exist.
    fn resolve_targets(&self, explicit: Option<Vec<String>>) -> Vec<Recipient> {
        let ids = explicit.unwrap_or_else(|| self.store.active_recipients());
        let roster = self.connection.recipients();
        ids.iter()
            .map(|id| {
                roster
                    .iter()
                    .find(|r| &r.id == id)
                    .cloned()
                    .unwrap_or_else(|| Recipient::new(id, id))
            })
            .collect()
    }

    fn skip(&self, trigger: DispatchTrigger, reason: &str) -> HeraldError {
        tracing::info!("⏭️ {trigger} dispatch skipped: {reason}");
        self.bus.emit(StatusEvent::DispatchSkipped {
            trigger,
            reason: reason.to_string(),
        });
        HeraldError::LockContention(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSource, MockTransport, recipients};
    use herald_core::config::{BatchConfig, ConnectionConfig};
    use herald_core::traits::{ContentSource, Transport};
    use std::path::PathBuf;
    use std::time::Duration;

    struct Harness {
        transport: Arc<MockTransport>,
        source: Arc<MockSource>,
        locks: Arc<LockRegistry>,
        store: Arc<StateStore>,
        connection: Arc<ConnectionManager>,
        coordinator: Coordinator,
        dir: PathBuf,
    }

    impl Harness {
        async fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("herald-coord-{name}"));
            std::fs::remove_dir_all(&dir).ok();

            let transport = Arc::new(MockTransport::new());
            *transport.recipients.lock().unwrap() = recipients(3);
            let source = Arc::new(MockSource::with_item("v1", "First video"));
            let locks = Arc::new(LockRegistry::new());
            let store = Arc::new(StateStore::open(&dir));
            let bus = StatusBus::default();

            let connection = ConnectionManager::new(
                transport.clone() as Arc<dyn Transport>,
                locks.clone(),
                bus.clone(),
                &ConnectionConfig {
                    base_delay_ms: 100,
                    max_delay_ms: 1000,
                    max_attempts: 3,
                },
            );
            connection.spawn_event_loop();

            // TTL zero: every dispatch consults the source.
            let cache = Arc::new(ContentCache::new(
                source.clone() as Arc<dyn ContentSource>,
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_secs(30),
            ));
            let batch = BatchSender::new(
                transport.clone() as Arc<dyn Transport>,
                BatchConfig {
                    max_per_batch: 10,
                    delay_between_recipients_ms: 0,
                    delay_between_batches_ms: 0,
                    send_timeout_secs: 30,
                },
                connection.status_rx(),
                bus.clone(),
            );
            let coordinator = Coordinator::new(
                connection.clone(),
                cache,
                batch,
                locks.clone(),
                store.clone(),
                bus,
                "chan",
            );
            Self {
                transport,
                source,
                locks,
                store,
                connection,
                coordinator,
                dir,
            }
        }

        async fn connect(&self) {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                transport.emit_opened();
            });
            self.connection.connect().await.unwrap();
            // Roster refresh runs in the event loop task.
            for _ in 0..100 {
                if self.connection.recipients().len() == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        fn select_all(&self) {
            for id in ["g1", "g2", "g3"] {
                self.store.set_recipient_active(id, true).unwrap();
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_dispatch_happy_path() {
        let h = Harness::new("happy").await;
        h.connect().await;
        h.select_all();

        let result = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap();
        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 0);
        assert_eq!(h.transport.sent(), vec!["g1", "g2", "g3"]);
        assert_eq!(h.store.last_item_id().as_deref(), Some("v1"));
        // Every lock was released.
        assert_eq!(h.locks.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_lock_makes_second_dispatch_fail_fast() {
        let h = Harness::new("global").await;
        h.connect().await;
        h.select_all();

        let held = h
            .locks
            .try_acquire_guard(LockScope::Global, GLOBAL_KEY)
            .unwrap();
        let err = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap_err();
        assert!(matches!(err, HeraldError::LockContention(_)));
        assert!(h.transport.sent().is_empty());

        drop(held);
        assert!(h.coordinator.dispatch(DispatchOptions::manual()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_payload_in_flight_fails_fast() {
        let h = Harness::new("fingerprint").await;
        h.connect().await;
        h.select_all();

        // Another dispatch of the same item holds the payload lock.
        let item = h.source.item.lock().unwrap().clone();
        let fingerprint = MessagePayload::for_item(&item).fingerprint();
        let held = h
            .locks
            .try_acquire_guard(LockScope::Fingerprint, &fingerprint)
            .unwrap();

        let err = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap_err();
        assert!(matches!(err, HeraldError::LockContention(_)));
        assert!(h.transport.sent().is_empty());
        // The global guard was released on the way out.
        assert!(!h.locks.is_held(LockScope::Global, GLOBAL_KEY));

        drop(held);
        assert!(h.coordinator.dispatch(DispatchOptions::manual()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_broadcast_item_is_skipped_unless_forced() {
        let h = Harness::new("dedup").await;
        h.connect().await;
        h.select_all();

        h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap();
        assert_eq!(h.transport.sent().len(), 3);

        let err = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap_err();
        assert!(matches!(err, HeraldError::NothingNew));
        assert_eq!(h.transport.sent().len(), 3);

        // Forcing re-sends the same item; the anchor does not change.
        let result = h.coordinator.dispatch(DispatchOptions::forced()).await.unwrap();
        assert_eq!(result.succeeded, 3);
        assert_eq!(h.transport.sent().len(), 6);
        assert_eq!(h.store.last_item_id().as_deref(), Some("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_item_moves_the_anchor() {
        let h = Harness::new("anchor").await;
        h.connect().await;
        h.select_all();

        h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap();
        h.source.set_item("v2", "Second video");
        h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap();
        assert_eq!(h.store.last_item_id().as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_requires_connection() {
        let h = Harness::new("offline").await;
        h.select_all();

        let err = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap_err();
        assert!(matches!(err, HeraldError::NotConnected));
        // The global guard did not leak.
        assert_eq!(h.locks.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_recipients_are_skipped() {
        let h = Harness::new("busy").await;
        h.connect().await;
        h.select_all();

        assert!(h.locks.try_acquire(LockScope::Recipient, "g2"));
        let result = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap();
        assert_eq!(result.attempted, 2);
        assert_eq!(h.transport.sent(), vec!["g1", "g3"]);
        // Only the externally held lock remains.
        assert_eq!(h.locks.held_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_recipients_busy_fails_fast() {
        let h = Harness::new("all-busy").await;
        h.connect().await;
        h.select_all();

        for id in ["g1", "g2", "g3"] {
            assert!(h.locks.try_acquire(LockScope::Recipient, id));
        }
        let err = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap_err();
        assert!(matches!(err, HeraldError::LockContention(_)));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_selection_is_a_config_error() {
        let h = Harness::new("empty").await;
        h.connect().await;

        let err = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap_err();
        assert!(matches!(err, HeraldError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_dispatch_with_explicit_targets() {
        let h = Harness::new("explicit").await;
        h.connect().await;
        h.select_all();

        let opts = DispatchOptions::scheduled(vec!["g3".to_string(), "g1".to_string()]);
        let result = h.coordinator.dispatch(opts).await.unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(h.transport.sent(), vec!["g3", "g1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fully_failed_dispatch_keeps_anchor_unset() {
        let h = Harness::new("all-fail").await;
        h.connect().await;
        h.select_all();
        for id in ["g1", "g2", "g3"] {
            h.transport.fail_for(id);
        }

        let result = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap();
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 3);
        assert!(h.store.last_item_id().is_none());
        // A later retry is not suppressed by the dedup check.
        h.transport.fail_on.lock().unwrap().clear();
        let result = h.coordinator.dispatch(DispatchOptions::manual()).await.unwrap();
        assert_eq!(result.succeeded, 3);
        assert_eq!(h.store.last_item_id().as_deref(), Some("v1"));
    }
}
