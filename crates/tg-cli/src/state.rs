//! JSON file persistence for the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use tg_core::{PersistedState, Settings, StateStore, StoreError};

/// [`StateStore`] backed by a JSON file. Saves go through a sibling temp
/// file and a rename so a crash never leaves a half-written state.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", self.path.display(), e))),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::Serialize(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state).map_err(|e| StoreError::Serialize(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(format!("{}: {}", parent.display(), e)))?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, json).map_err(|e| StoreError::Io(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::Io(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

/// Load a saved state, failing when the file is missing.
pub fn read_state(path: &str) -> Result<PersistedState, String> {
    JsonFileStore::new(path)
        .load()
        .map_err(|e| format!("Failed to load state: {}", e))?
        .ok_or_else(|| format!("State file '{}' does not exist", path))
}

pub fn read_settings(path: &str) -> Result<Settings, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid settings JSON in '{}': {}", path, e))
}
