//! JSON state store.
//!
//! Holds what the coordinator needs to resume after a restart: the
//! last-dispatched item id (dedup anchor), schedule definitions, and the
//! active recipient selection. Loaded once at startup, the whole file is
//! rewritten after every mutating operation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::types::ScheduleDefinition;

/// Everything persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotState {
    /// Id of the last item actually broadcast. Forced re-sends do not
    /// move this anchor.
    #[serde(default)]
    pub last_item_id: Option<String>,
    /// Recipient ids selected for broadcasts.
    #[serde(default)]
    pub active_recipients: Vec<String>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDefinition>,
    #[serde(default)]
    pub saved_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// File-backed state store.
pub struct StateStore {
    file: PathBuf,
    state: Mutex<BotState>,
}

impl StateStore {
    /// Open the store at `dir/state.json`, loading existing state if any.
    pub fn open(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).ok();
        let file = dir.join("state.json");
        let state = Self::load_file(&file);
        Self {
            file,
            state: Mutex::new(state),
        }
    }

    fn load_file(file: &Path) -> BotState {
        if !file.exists() {
            return BotState::default();
        }
        match std::fs::read_to_string(file) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ failed to parse {}: {e}", file.display());
                BotState::default()
            }),
            Err(e) => {
                tracing::warn!("⚠️ failed to read {}: {e}", file.display());
                BotState::default()
            }
        }
    }

    pub fn last_item_id(&self) -> Option<String> {
        self.state.lock().unwrap().last_item_id.clone()
    }

    pub fn set_last_item_id(&self, id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.last_item_id = Some(id.to_string());
        }
        self.save()
    }

    pub fn active_recipients(&self) -> Vec<String> {
        self.state.lock().unwrap().active_recipients.clone()
    }

    /// Add or remove a recipient id from the active selection.
    /// Returns false if the call was a no-op.
    pub fn set_recipient_active(&self, recipient_id: &str, active: bool) -> Result<bool> {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let present = state.active_recipients.iter().any(|r| r == recipient_id);
            match (present, active) {
                (false, true) => {
                    state.active_recipients.push(recipient_id.to_string());
                    true
                }
                (true, false) => {
                    state.active_recipients.retain(|r| r != recipient_id);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn schedules(&self) -> Vec<ScheduleDefinition> {
        self.state.lock().unwrap().schedules.clone()
    }

    /// Insert or replace a schedule by id.
    pub fn upsert_schedule(&self, def: &ScheduleDefinition) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.schedules.retain(|s| s.id != def.id);
            state.schedules.push(def.clone());
        }
        self.save()
    }

    /// Remove a schedule by id. Returns false if it was not there.
    pub fn remove_schedule(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let len = state.schedules.len();
            state.schedules.retain(|s| s.id != id);
            state.schedules.len() < len
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn snapshot(&self) -> BotState {
        self.state.lock().unwrap().clone()
    }

    fn save(&self) -> Result<()> {
        let json = {
            let mut state = self.state.lock().unwrap();
            state.saved_at = Some(chrono::Utc::now());
            serde_json::to_string_pretty(&*state)
                .map_err(|e| crate::error::HeraldError::Config(format!("serialize state: {e}")))?
        };
        std::fs::write(&self.file, json)?;
        tracing::debug!("💾 state saved to {}", self.file.display());
        Ok(())
    }
}
