//! WebAssembly bindings for TrackGuard
//!
//! The extension creates one `TrackGuard` instance at startup and keeps it
//! for the lifetime of the background context. Artifacts and settings cross
//! the boundary as plain JS objects.

mod console_log;

use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use tg_core::{
    Artifact, ArtifactOutcome, DetectionEngine, DetectionRecord, Disposition, Effect, ExportFormat, PersistedState,
    Settings, SettingsPatch, SignatureCatalog, StateStore, StoreError,
};

pub use console_log::init_logging;

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    let json = serde_json::to_string(value).map_err(|e| JsValue::from_str(&format!("Failed to encode: {}", e)))?;
    js_sys::JSON::parse(&json)
}

fn from_js<T: DeserializeOwned>(value: &JsValue, what: &str) -> Result<T, JsValue> {
    let json: String = js_sys::JSON::stringify(value)?.into();
    serde_json::from_str(&json).map_err(|e| JsValue::from_str(&format!("Invalid {}: {}", what, e)))
}

fn disposition_str(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Registered => "registered",
        Disposition::BlockedOnly => "blocked_only",
        Disposition::Allowed => "allowed",
    }
}

fn outcome_object(outcome: &ArtifactOutcome, effects: &[Effect]) -> JsValue {
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"shouldBlock".into(), &JsValue::from(outcome.should_block));
    let _ = js_sys::Reflect::set(
        &result,
        &"disposition".into(),
        &JsValue::from_str(disposition_str(outcome.disposition)),
    );
    if let Some(family) = &outcome.matched_family {
        let _ = js_sys::Reflect::set(&result, &"matchedFamily".into(), &JsValue::from_str(family));
    }
    let effects = to_js(effects).unwrap_or_else(|_| js_sys::Array::new().into());
    let _ = js_sys::Reflect::set(&result, &"effects".into(), &effects);
    result.into()
}

#[derive(Serialize)]
struct SnapshotEntry<'a> {
    domain: &'a str,
    #[serde(flatten)]
    record: &'a DetectionRecord,
}

/// Hands each save to a JS callback as a JSON string. An async callback's
/// promise is not awaited; its failures are the caller's to handle.
struct JsCallbackStore<'f> {
    save: &'f js_sys::Function,
}

impl StateStore for JsCallbackStore<'_> {
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError> {
        Ok(None)
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.save
            .call1(&JsValue::NULL, &JsValue::from_str(&json))
            .map_err(|e| StoreError::Io(e.as_string().unwrap_or_else(|| "save callback threw".to_string())))?;
        Ok(())
    }
}

#[wasm_bindgen]
pub struct TrackGuard {
    engine: DetectionEngine,
}

#[wasm_bindgen]
impl TrackGuard {
    /// Create the engine, restoring from a previously saved state object when given.
    #[wasm_bindgen(constructor)]
    pub fn new(state: JsValue) -> Result<TrackGuard, JsValue> {
        let catalog = SignatureCatalog::builtin();
        log::debug!(
            "catalog ready: {} families, {} known domains",
            catalog.families().len(),
            catalog.known_domains().len()
        );
        let engine = if state.is_undefined() || state.is_null() {
            DetectionEngine::new(catalog, Settings::default())
        } else {
            let state: PersistedState = from_js(&state, "saved state")?;
            DetectionEngine::restore(catalog, state)
        };
        Ok(TrackGuard { engine })
    }

    /// Process one artifact. Never throws: malformed artifacts are allowed.
    pub fn handle(&mut self, artifact: JsValue) -> JsValue {
        let artifact: Artifact = match from_js(&artifact, "artifact") {
            Ok(artifact) => artifact,
            Err(e) => {
                log::warn!("{}", e.as_string().unwrap_or_default());
                return outcome_object(&ArtifactOutcome::allowed(), &[]);
            }
        };
        let mut effects = Vec::new();
        let outcome = self.engine.handle(&artifact, &mut effects);
        outcome_object(&outcome, &effects)
    }

    /// Synchronous request verdict for `webRequest.onBeforeRequest`.
    #[wasm_bindgen(js_name = shouldBlockRequest)]
    pub fn should_block_request(&mut self, url: &str, request_type: &str, source_hostname: &str, timestamp: f64) -> bool {
        let artifact = Artifact::request(url, request_type, source_hostname, timestamp as u64);
        let mut effects = Vec::new();
        self.engine.handle(&artifact, &mut effects).should_block
    }

    pub fn settings(&self) -> Result<JsValue, JsValue> {
        to_js(self.engine.settings())
    }

    /// Apply a partial settings object. Throws with a description when rejected.
    #[wasm_bindgen(js_name = updateSettings)]
    pub fn update_settings(&mut self, patch: JsValue) -> Result<JsValue, JsValue> {
        let patch: SettingsPatch = from_js(&patch, "settings")?;
        let settings = self
            .engine
            .update_settings(&patch)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        to_js(settings)
    }

    pub fn stats(&self) -> Result<JsValue, JsValue> {
        to_js(&self.engine.stats())
    }

    #[wasm_bindgen(js_name = runMaintenance)]
    pub fn run_maintenance(&mut self, now: f64) -> JsValue {
        let report = self.engine.run_maintenance(now as u64);
        let result = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&result, &"evicted".into(), &JsValue::from(report.evicted as u32));
        let _ = js_sys::Reflect::set(&result, &"expired".into(), &JsValue::from(report.expired as u32));
        result.into()
    }

    #[wasm_bindgen(js_name = exportableKeys)]
    pub fn exportable_keys(&self) -> js_sys::Array {
        self.engine
            .exportable_keys()
            .into_iter()
            .map(|key| JsValue::from_str(&key))
            .collect()
    }

    /// The `n` most recently seen registry records, newest first.
    pub fn snapshot(&self, n: u32) -> Result<JsValue, JsValue> {
        let entries: Vec<SnapshotEntry<'_>> = self
            .engine
            .snapshot(n as usize)
            .into_iter()
            .map(|(domain, record)| SnapshotEntry { domain, record })
            .collect();
        to_js(&entries)
    }

    /// Render the exportable domains. `format` defaults to the configured one.
    #[wasm_bindgen(js_name = exportBlocklist)]
    pub fn export_blocklist(&self, format: Option<String>, now: f64) -> Result<JsValue, JsValue> {
        let format = match format.as_deref() {
            Some(name) => {
                ExportFormat::parse(name).ok_or_else(|| JsValue::from_str(&format!("Unknown export format: {}", name)))?
            }
            None => self.engine.settings().export_format,
        };
        let generated_at =
            DateTime::from_timestamp_millis(now as i64).ok_or_else(|| JsValue::from_str("Invalid export timestamp"))?;
        let file = tg_export::export_engine(&self.engine, format, generated_at)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        to_js(&file)
    }

    #[wasm_bindgen(js_name = isDirty)]
    pub fn is_dirty(&self) -> bool {
        self.engine.is_dirty()
    }

    #[wasm_bindgen(js_name = persistedState)]
    pub fn persisted_state(&self) -> Result<JsValue, JsValue> {
        to_js(&self.engine.persisted_state())
    }

    /// Pass the state to `save(json)` when dirty. Returns whether it was called.
    pub fn flush(&mut self, save: &js_sys::Function) -> Result<bool, JsValue> {
        let mut store = JsCallbackStore { save };
        self.engine
            .flush(&mut store)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn clear(&mut self) {
        self.engine.clear();
    }
}
