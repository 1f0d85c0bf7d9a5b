//! Paced batch sending.
//!
//! Recipients are processed in the order supplied, in deterministic
//! `ceil(n / max_per_batch)` slices, strictly sequentially — bursty or
//! concurrent sends are what get accounts flagged. Each send carries a
//! timeout; a per-recipient failure is recorded and the batch moves on,
//! but a connection-level failure stops the dispatch early and marks
//! everything not yet attempted as failed.

use std::sync::Arc;

use tokio::sync::watch;

use herald_core::config::BatchConfig;
use herald_core::traits::Transport;
use herald_core::types::{
    ConnectionState, ConnectionStatus, DispatchResult, MessagePayload, Recipient, StatusEvent,
};

use crate::events::StatusBus;

pub struct BatchSender {
    transport: Arc<dyn Transport>,
    config: BatchConfig,
    /// Connection state observed between sends so a disconnect cancels
    /// the remainder instead of hammering a dead session.
    status: watch::Receiver<ConnectionStatus>,
    bus: StatusBus,
}

impl BatchSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: BatchConfig,
        status: watch::Receiver<ConnectionStatus>,
        bus: StatusBus,
    ) -> Self {
        let mut config = config;
        config.max_per_batch = config.max_per_batch.max(1);
        Self {
            transport,
            config,
            status,
            bus,
        }
    }

    /// Send `payload` to every recipient. Always returns a complete
    /// accounting: `attempted == succeeded + failed`.
    pub async fn send(&self, recipients: &[Recipient], payload: &MessagePayload) -> DispatchResult {
        let mut result = DispatchResult::default();

        for (i, recipient) in recipients.iter().enumerate() {
            if i > 0 {
                let delay = if i % self.config.max_per_batch == 0 {
                    self.config.delay_between_batches()
                } else {
                    self.config.delay_between_recipients()
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            if self.status.borrow().state != ConnectionState::Connected {
                self.mark_remaining_failed(&mut result, &recipients[i..], "connection lost");
                break;
            }

            let send = self.transport.send_message(&recipient.id, payload);
            match tokio::time::timeout(self.config.send_timeout(), send).await {
                Ok(Ok(())) => {
                    result.attempted += 1;
                    result.succeeded += 1;
                    tracing::info!("📤 sent to '{}'", recipient.name);
                    self.bus.emit(StatusEvent::DispatchProgress {
                        recipient: recipient.clone(),
                        ok: true,
                    });
                }
                Ok(Err(e)) => {
                    result.attempted += 1;
                    result.failed += 1;
                    result.errors.push((recipient.clone(), e.to_string()));
                    tracing::warn!("⚠️ send to '{}' failed: {e}", recipient.name);
                    self.bus.emit(StatusEvent::DispatchProgress {
                        recipient: recipient.clone(),
                        ok: false,
                    });
                    if e.is_connection_lost() {
                        self.mark_remaining_failed(
                            &mut result,
                            &recipients[i + 1..],
                            "connection lost",
                        );
                        break;
                    }
                }
                Err(_elapsed) => {
                    result.attempted += 1;
                    result.failed += 1;
                    result
                        .errors
                        .push((recipient.clone(), "send timed out".to_string()));
                    tracing::warn!("⚠️ send to '{}' timed out", recipient.name);
                    self.bus.emit(StatusEvent::DispatchProgress {
                        recipient: recipient.clone(),
                        ok: false,
                    });
                }
            }
        }

        result
    }

    fn mark_remaining_failed(
        &self,
        result: &mut DispatchResult,
        remaining: &[Recipient],
        reason: &str,
    ) {
        if remaining.is_empty() {
            return;
        }
        tracing::warn!(
            "🛑 stopping dispatch early, marking {} remaining recipient(s) failed: {reason}",
            remaining.len()
        );
        for recipient in remaining {
            result.attempted += 1;
            result.failed += 1;
            result
                .errors
                .push((recipient.clone(), format!("{reason}, not attempted")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, recipients};
    use std::time::Duration;

    fn payload() -> MessagePayload {
        MessagePayload {
            text: "hello".into(),
            media_url: None,
        }
    }

    fn connected_status() -> (watch::Sender<ConnectionStatus>, watch::Receiver<ConnectionStatus>) {
        watch::channel(ConnectionStatus {
            state: ConnectionState::Connected,
            ..ConnectionStatus::default()
        })
    }

    fn sender(
        transport: &Arc<MockTransport>,
        config: BatchConfig,
        status: watch::Receiver<ConnectionStatus>,
    ) -> BatchSender {
        BatchSender::new(
            transport.clone() as Arc<dyn Transport>,
            config,
            status,
            StatusBus::default(),
        )
    }

    fn test_config() -> BatchConfig {
        BatchConfig {
            max_per_batch: 4,
            delay_between_recipients_ms: 0,
            delay_between_batches_ms: 0,
            send_timeout_secs: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_abort() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_for("g7");
        let (_tx, rx) = connected_status();
        let sender = sender(&transport, test_config(), rx);

        let result = sender.send(&recipients(10), &payload()).await;
        assert_eq!(result.attempted, 10);
        assert_eq!(result.succeeded, 9);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0.id, "g7");
        assert!(result.is_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_stops_early() {
        let transport = Arc::new(MockTransport::new());
        *transport.drop_connection_on.lock().unwrap() = Some("g3".to_string());
        let (_tx, rx) = connected_status();
        let sender = sender(&transport, test_config(), rx);

        let result = sender.send(&recipients(10), &payload()).await;
        // g1, g2 succeeded; g3 hit the connection error; g4..g10 were
        // marked failed without being attempted on the wire.
        assert_eq!(transport.sent(), vec!["g1", "g2", "g3"]);
        assert_eq!(result.attempted, 10);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 8);
        assert!(result.is_consistent());
        assert!(result.errors.iter().any(|(r, e)| r.id == "g4" && e.contains("not attempted")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_observed_between_sends_cancels_remainder() {
        let transport = Arc::new(MockTransport::new());
        let (tx, rx) = connected_status();
        let mut config = test_config();
        config.delay_between_recipients_ms = 100;
        let sender = sender(&transport, config, rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            tx.send_modify(|s| s.state = ConnectionState::Failed);
        });

        let result = sender.send(&recipients(10), &payload()).await;
        // Sends at t=0 and t=100 went out; the t=200 send saw the
        // disconnect first.
        assert_eq!(transport.sent(), vec!["g1", "g2"]);
        assert_eq!(result.attempted, 10);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 8);
        assert!(result.is_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_is_a_per_recipient_failure() {
        let transport = Arc::new(MockTransport::new());
        *transport.hang_on.lock().unwrap() = Some("g2".to_string());
        let (_tx, rx) = connected_status();
        let mut config = test_config();
        config.send_timeout_secs = 1;
        let sender = sender(&transport, config, rx);

        let result = sender.send(&recipients(3), &payload()).await;
        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].0.id, "g2");
        assert!(result.errors[0].1.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recipients_processed_in_supplied_order() {
        let transport = Arc::new(MockTransport::new());
        let (_tx, rx) = connected_status();
        let sender = sender(&transport, test_config(), rx);

        let mut targets = recipients(5);
        targets.reverse();
        sender.send(&targets, &payload()).await;
        assert_eq!(transport.sent(), vec!["g5", "g4", "g3", "g2", "g1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_pacing_delays() {
        let transport = Arc::new(MockTransport::new());
        let (_tx, rx) = connected_status();
        let config = BatchConfig {
            max_per_batch: 4,
            delay_between_recipients_ms: 1000,
            delay_between_batches_ms: 5000,
            send_timeout_secs: 30,
        };
        let sender = sender(&transport, config, rx);

        let start = tokio::time::Instant::now();
        let result = sender.send(&recipients(10), &payload()).await;
        assert_eq!(result.succeeded, 10);
        // Batches [4,4,2]: seven 1s gaps within batches, two 5s gaps
        // between batches.
        assert_eq!(start.elapsed(), Duration::from_secs(17));
    }
}
