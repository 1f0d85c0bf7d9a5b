//! Schedule engine — the tick loop that fires due broadcasts.
//!
//! Schedule definitions are owned by configuration: registration and
//! removal work whether or not the transport is connected, and survive
//! restarts via the state store. Firing is best-effort — a tick that
//! finds the transport down or the previous run still in flight skips
//! that slot and moves on to the next one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use herald_core::error::{HeraldError, Result};
use herald_core::store::StateStore;
use herald_core::types::{ScheduleDefinition, StatusEvent};
use herald_dispatch::connection::ConnectionManager;
use herald_dispatch::coordinator::{Coordinator, DispatchOptions};
use herald_dispatch::events::StatusBus;
use herald_dispatch::locks::{LockRegistry, LockScope};

use crate::cron::{self, CronSpec};

struct Entry {
    def: ScheduleDefinition,
    next_run: Option<DateTime<Utc>>,
}

pub struct ScheduleEngine {
    entries: Mutex<Vec<Entry>>,
    coordinator: Arc<Coordinator>,
    connection: Arc<ConnectionManager>,
    locks: Arc<LockRegistry>,
    store: Arc<StateStore>,
    bus: StatusBus,
    tick_interval: Duration,
}

impl ScheduleEngine {
    /// Build the engine and re-register every persisted schedule.
    /// Definitions that no longer parse are dropped with a warning.
    pub fn new(
        coordinator: Arc<Coordinator>,
        connection: Arc<ConnectionManager>,
        locks: Arc<LockRegistry>,
        store: Arc<StateStore>,
        bus: StatusBus,
        tick_interval: Duration,
    ) -> Arc<Self> {
        let now = Utc::now();
        let mut entries = Vec::new();
        for def in store.schedules() {
            match CronSpec::parse(&def.expression) {
                Ok(spec) => {
                    let next_run = def.enabled.then(|| spec.next_after(now)).flatten();
                    entries.push(Entry { def, next_run });
                }
                Err(e) => {
                    tracing::warn!("⚠️ dropping persisted schedule '{}': {e}", def.name);
                }
            }
        }
        Arc::new(Self {
            entries: Mutex::new(entries),
            coordinator,
            connection,
            locks,
            store,
            bus,
            tick_interval,
        })
    }

    /// Register (or replace) a schedule. The expression is validated
    /// here so a bad definition never reaches the tick loop.
    pub fn register(&self, def: ScheduleDefinition) -> Result<()> {
        let spec = CronSpec::parse(&def.expression)?;
        let next_run = def.enabled.then(|| spec.next_after(Utc::now())).flatten();
        self.store.upsert_schedule(&def)?;
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.def.id != def.id);
        tracing::info!(
            "📅 schedule '{}' registered ({}), next run {:?}",
            def.name,
            def.expression,
            next_run
        );
        entries.push(Entry { def, next_run });
        Ok(())
    }

    /// Remove a schedule by id. Built-in schedules are refused.
    pub fn remove(&self, id: &str) -> Result<bool> {
        {
            let entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.iter().find(|e| e.def.id == id)
                && entry.def.standard
            {
                return Err(HeraldError::Config(format!(
                    "schedule '{}' is built-in and cannot be removed",
                    entry.def.name
                )));
            }
        }
        let removed = self.store.remove_schedule(id)?;
        self.entries.lock().unwrap().retain(|e| e.def.id != id);
        if removed {
            tracing::info!("🗑️ schedule '{id}' removed");
        }
        Ok(removed)
    }

    /// Enable or disable a schedule. Returns false for an unknown id.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let def = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.iter_mut().find(|e| e.def.id == id) else {
                return Ok(false);
            };
            entry.def.enabled = enabled;
            entry.next_run = enabled
                .then(|| cron::next_run_from_cron(&entry.def.expression, Utc::now()))
                .flatten();
            entry.def.clone()
        };
        self.store.upsert_schedule(&def)?;
        tracing::info!(
            "📅 schedule '{}' {}",
            def.name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(true)
    }

    /// All known schedules with their next run times.
    pub fn list(&self) -> Vec<(ScheduleDefinition, Option<DateTime<Utc>>)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.def.clone(), e.next_run))
            .collect()
    }

    /// Run the tick loop until the task is aborted.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.tick(Utc::now());
            }
        })
    }

    /// Fire every schedule due at `now`. Returns how many were started.
    ///
    /// The next run time advances whether the slot fires or is skipped:
    /// a missed slot is gone, never backfilled.
    pub fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let due: Vec<ScheduleDefinition> = {
            let mut entries = self.entries.lock().unwrap();
            entries
                .iter_mut()
                .filter(|e| {
                    e.def.enabled && e.next_run.is_some_and(|next| next <= now)
                })
                .map(|e| {
                    e.next_run = cron::next_run_from_cron(&e.def.expression, now);
                    e.def.clone()
                })
                .collect()
        };

        let mut started = 0;
        for def in due {
            if self.locks.is_held(LockScope::Schedule, &def.id) {
                tracing::warn!("⏭️ schedule '{}' still running, skipping this slot", def.name);
                self.bus.emit(StatusEvent::ScheduleSkipped {
                    schedule_id: def.id,
                    reason: "previous run still in progress".into(),
                });
                continue;
            }
            if !self.connection.is_connected() {
                tracing::warn!("⏭️ schedule '{}' due but transport not connected", def.name);
                self.bus.emit(StatusEvent::ScheduleSkipped {
                    schedule_id: def.id,
                    reason: "transport not connected".into(),
                });
                continue;
            }
            let Some(guard) = self.locks.try_acquire_guard(LockScope::Schedule, &def.id) else {
                continue;
            };

            tracing::info!("🔔 schedule '{}' fired", def.name);
            self.bus.emit(StatusEvent::ScheduleFired {
                schedule_id: def.id.clone(),
            });
            started += 1;

            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                // The guard lives for the whole dispatch.
                let _guard = guard;
                match coordinator
                    .dispatch(DispatchOptions::scheduled(def.recipients.clone()))
                    .await
                {
                    Ok(result) => {
                        tracing::info!(
                            "✅ schedule '{}' done: {}/{} sent",
                            def.name,
                            result.succeeded,
                            result.attempted
                        );
                    }
                    Err(HeraldError::NothingNew) => {
                        tracing::info!("📭 schedule '{}': nothing new to broadcast", def.name);
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ schedule '{}' failed: {e}", def.name);
                    }
                }
            });
        }
        started
    }
}
