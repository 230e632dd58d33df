//! Persistence seam.
//!
//! The engine never does I/O. A host implements [`StateStore`] and calls
//! [`DetectionEngine::flush`](crate::pipeline::DetectionEngine::flush) on its
//! own schedule; losing the last few seconds of detections on abrupt
//! shutdown is accepted.

use serde::{Deserialize, Serialize};

use crate::pipeline::EngineStats;
use crate::registry::DetectionRecord;
use crate::settings::Settings;

/// Everything the engine needs to come back after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub entries: Vec<(String, DetectionRecord)>,
    pub settings: Settings,
    pub stats: EngineStats,
}

/// Persistence collaborator failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(String),
    #[error("state (de)serialization failed: {0}")]
    Serialize(String),
}

/// Load/save boundary implemented by the host.
pub trait StateStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError>;
    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError>;
}

/// Store that keeps the last saved state in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Option<PersistedState>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Some(state),
            saves: 0,
        }
    }

    pub fn state(&self) -> Option<&PersistedState> {
        self.state.as_ref()
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl StateStore for MemoryStore {
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        self.state = Some(state.clone());
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);

        let state = PersistedState::default();
        store.save(&state).unwrap();
        assert_eq!(store.saves(), 1);
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_state_tolerates_missing_fields() {
        let state: PersistedState = serde_json::from_str(r#"{"entries":[]}"#).unwrap();
        assert_eq!(state.settings, Settings::default());
        assert_eq!(state.stats, EngineStats::default());
    }
}
