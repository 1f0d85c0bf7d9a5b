//! Application wiring.
//!
//! Builds the component graph out of one [`HeraldConfig`] and owns the
//! background tasks: transport event loop, scheduler tick loop, stale
//! lock sweeper, and the status event mirror.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use herald_core::HeraldConfig;
use herald_core::store::StateStore;
use herald_core::traits::{ContentSource, Transport};
use herald_core::types::{Recipient, ScheduleDefinition};
use herald_dispatch::{
    BatchSender, ContentCache, ConnectionManager, Coordinator, LockRegistry, StatusBus,
};
use herald_scheduler::ScheduleEngine;
use herald_transport::{CloudApiTransport, YouTubeSource};

pub struct App {
    pub config: HeraldConfig,
    pub locks: Arc<LockRegistry>,
    pub store: Arc<StateStore>,
    pub bus: StatusBus,
    pub connection: Arc<ConnectionManager>,
    pub coordinator: Arc<Coordinator>,
    pub engine: Arc<ScheduleEngine>,
}

impl App {
    pub fn build(config: HeraldConfig) -> Result<Self> {
        let store = Arc::new(StateStore::open(&config.store.resolved_dir()));
        let locks = Arc::new(LockRegistry::new());
        let bus = StatusBus::default();

        // The Cloud API cannot enumerate groups; seed the roster from
        // the persisted active selection.
        let roster: Vec<Recipient> = store
            .active_recipients()
            .iter()
            .map(|id| Recipient::new(id, id))
            .collect();
        let transport: Arc<dyn Transport> =
            Arc::new(CloudApiTransport::new(&config.transport).with_recipients(roster));
        let source: Arc<dyn ContentSource> = Arc::new(YouTubeSource::new(&config.source.api_key));

        let connection =
            ConnectionManager::new(transport.clone(), locks.clone(), bus.clone(), &config.connection);
        let cache = Arc::new(ContentCache::from_config(source, &config.source));
        let batch = BatchSender::new(
            transport,
            config.batch.clone(),
            connection.status_rx(),
            bus.clone(),
        );
        let coordinator = Arc::new(Coordinator::new(
            connection.clone(),
            cache,
            batch,
            locks.clone(),
            store.clone(),
            bus.clone(),
            &config.source.channel_id,
        ));
        let engine = ScheduleEngine::new(
            coordinator.clone(),
            connection.clone(),
            locks.clone(),
            store.clone(),
            bus.clone(),
            Duration::from_secs(config.scheduler.tick_interval_secs),
        );

        Ok(Self {
            config,
            locks,
            store,
            bus,
            connection,
            coordinator,
            engine,
        })
    }

    /// Register the built-in daily broadcast schedules from config.
    /// Idempotent: ids are derived from the expression.
    pub fn register_standard_schedules(&self) -> Result<()> {
        for expression in &self.config.scheduler.standard_times {
            self.engine
                .register(ScheduleDefinition::standard(expression))?;
        }
        Ok(())
    }

    /// Start every background task. Handles are returned so the caller
    /// can abort them on shutdown.
    pub fn spawn_background(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = vec![self.connection.spawn_event_loop(), self.engine.spawn()];
        handles.push(self.spawn_lock_sweeper());
        handles.push(self.spawn_status_mirror());
        handles
    }

    fn spawn_lock_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let locks = self.locks.clone();
        let stale_after = Duration::from_secs(self.config.locks.stale_after_secs);
        let interval = Duration::from_secs(self.config.locks.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let expired = locks.sweep_stale(stale_after);
                if expired > 0 {
                    tracing::warn!("🔓 expired {expired} stale lock(s)");
                }
            }
        })
    }

    /// Mirror every status event at debug level, as structured JSON.
    fn spawn_status_mirror(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            tracing::debug!(target: "herald::events", "{json}");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("status mirror lagged by {n}");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
