//! Core type definitions for TrackGuard
//!
//! Artifacts come in from the extension's event sources, decisions and
//! effects go back out. Serde names match the JSON the extension exchanges.

use serde::{Deserialize, Serialize};

// =============================================================================
// Detection Methods
// =============================================================================

/// How a tracker was observed. Stored per registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionMethod {
    #[serde(rename = "request")]
    Request,
    #[serde(rename = "cookie")]
    Cookie,
    #[serde(rename = "javascript")]
    Javascript,
    #[serde(rename = "global")]
    Global,
    #[serde(rename = "dataLayer")]
    DataLayer,
    #[serde(rename = "gtm")]
    Gtm,
    #[serde(rename = "measurement")]
    Measurement,
    #[serde(rename = "dynamic-script")]
    DynamicScript,
    #[serde(rename = "zombie-storage")]
    ZombieStorage,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Cookie => "cookie",
            Self::Javascript => "javascript",
            Self::Global => "global",
            Self::DataLayer => "dataLayer",
            Self::Gtm => "gtm",
            Self::Measurement => "measurement",
            Self::DynamicScript => "dynamic-script",
            Self::ZombieStorage => "zombie-storage",
        }
    }
}

// =============================================================================
// Blocking Decision
// =============================================================================

/// Where a block is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMethod {
    /// Blocked in-browser and eligible for DNS/hosts-level export
    NetworkLevel,
    /// Blocked in-browser only (self-hosted or ambiguous)
    BrowserOnly,
    /// Not blocked
    None,
}

/// Disposition of a single classified detection. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingDecision {
    pub should_block: bool,
    pub register_for_export: bool,
    pub target_domain: String,
    pub blocking_method: BlockingMethod,
}

impl BlockingDecision {
    pub fn network_level(target_domain: impl Into<String>) -> Self {
        Self {
            should_block: true,
            register_for_export: true,
            target_domain: target_domain.into(),
            blocking_method: BlockingMethod::NetworkLevel,
        }
    }

    pub fn browser_only(target_domain: impl Into<String>) -> Self {
        Self {
            should_block: true,
            register_for_export: false,
            target_domain: target_domain.into(),
            blocking_method: BlockingMethod::BrowserOnly,
        }
    }

    pub fn allow(target_domain: impl Into<String>) -> Self {
        Self {
            should_block: false,
            register_for_export: false,
            target_domain: target_domain.into(),
            blocking_method: BlockingMethod::None,
        }
    }
}

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Browser request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;  // iframe/frame
        const MAIN_FRAME = 1 << 6;   // top-level document
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
        const BEACON = 1 << 13;
        const FETCH = 1 << 14;

        /// All request types
        const ALL = 0x7FFF;
        /// Types the pipeline inspects. Top-level navigations are never blocked.
        const INSPECTED = Self::ALL.bits() & !Self::MAIN_FRAME.bits();
    }
}

impl RequestType {
    /// Parse from a `webRequest` type string. Unknown strings map to `OTHER`.
    pub fn from_browser_str(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::MAIN_FRAME,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" | "imageset" => Self::IMAGE,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "beacon" => Self::BEACON,
            "fetch" => Self::FETCH,
            "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            _ => Self::OTHER,
        }
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// Kind of observed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    #[serde(rename = "request")]
    Request,
    #[serde(rename = "cookie")]
    Cookie,
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "global")]
    Global,
    #[serde(rename = "dataLayer")]
    DataLayer,
    #[serde(rename = "dynamic-script")]
    DynamicScript,
    #[serde(rename = "zombie-storage")]
    ZombieStorage,
}

/// A normalized artifact handed in by an event source.
///
/// Which optional fields are meaningful depends on `kind`:
/// - `request`, `dynamic-script`: `url` (and `request_type` for requests)
/// - `cookie`: `cookie_name`, `cookie_value`, `domain`, `removed`
/// - `script`: `script_text`
/// - `global`: `global_name`
/// - `dataLayer`: nothing beyond the page host
/// - `zombie-storage`: `storage_key`, `storage_value`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Artifact {
    pub kind: Option<ArtifactKind>,
    pub url: Option<String>,
    pub request_type: Option<String>,
    pub cookie_name: Option<String>,
    pub cookie_value: Option<String>,
    pub domain: Option<String>,
    pub removed: bool,
    pub script_text: Option<String>,
    pub global_name: Option<String>,
    pub storage_key: Option<String>,
    pub storage_value: Option<String>,
    pub source_hostname: String,
    pub timestamp: u64,
}

impl Artifact {
    pub fn request(url: &str, request_type: &str, source_hostname: &str, timestamp: u64) -> Self {
        Self {
            kind: Some(ArtifactKind::Request),
            url: Some(url.to_string()),
            request_type: Some(request_type.to_string()),
            source_hostname: source_hostname.to_string(),
            timestamp,
            ..Self::default()
        }
    }

    pub fn cookie(name: &str, value: &str, domain: &str, source_hostname: &str, timestamp: u64) -> Self {
        Self {
            kind: Some(ArtifactKind::Cookie),
            cookie_name: Some(name.to_string()),
            cookie_value: Some(value.to_string()),
            domain: Some(domain.to_string()),
            source_hostname: source_hostname.to_string(),
            timestamp,
            ..Self::default()
        }
    }

    pub fn script(text: &str, source_hostname: &str, timestamp: u64) -> Self {
        Self {
            kind: Some(ArtifactKind::Script),
            script_text: Some(text.to_string()),
            source_hostname: source_hostname.to_string(),
            timestamp,
            ..Self::default()
        }
    }

    pub fn global(name: &str, source_hostname: &str, timestamp: u64) -> Self {
        Self {
            kind: Some(ArtifactKind::Global),
            global_name: Some(name.to_string()),
            source_hostname: source_hostname.to_string(),
            timestamp,
            ..Self::default()
        }
    }

    pub fn data_layer(source_hostname: &str, timestamp: u64) -> Self {
        Self {
            kind: Some(ArtifactKind::DataLayer),
            source_hostname: source_hostname.to_string(),
            timestamp,
            ..Self::default()
        }
    }

    pub fn dynamic_script(src: &str, source_hostname: &str, timestamp: u64) -> Self {
        Self {
            kind: Some(ArtifactKind::DynamicScript),
            url: Some(src.to_string()),
            source_hostname: source_hostname.to_string(),
            timestamp,
            ..Self::default()
        }
    }

    pub fn zombie_storage(key: &str, value: &str, source_hostname: &str, timestamp: u64) -> Self {
        Self {
            kind: Some(ArtifactKind::ZombieStorage),
            storage_key: Some(key.to_string()),
            storage_value: Some(value.to_string()),
            source_hostname: source_hostname.to_string(),
            timestamp,
            ..Self::default()
        }
    }
}

// =============================================================================
// Outcomes and Effects
// =============================================================================

/// Terminal state of one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Blocked and recorded as an export-eligible domain
    Registered,
    /// Blocked in-browser only
    BlockedOnly,
    /// Not blocked (no match, low sensitivity, or fail-open)
    Allowed,
}

/// Result handed back to the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactOutcome {
    pub should_block: bool,
    pub disposition: Disposition,
    pub matched_family: Option<String>,
}

impl ArtifactOutcome {
    pub fn allowed() -> Self {
        Self {
            should_block: false,
            disposition: Disposition::Allowed,
            matched_family: None,
        }
    }
}

/// Side effect the host must carry out with its own browser APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Effect {
    RemoveCookie { name: String, domain: String },
    RemoveStorageItem { key: String, host: String },
    SuggestExport { exportable: usize },
}

/// Receiver for effects emitted while handling an artifact.
pub trait EffectSink {
    fn emit(&mut self, effect: Effect);
}

impl EffectSink for Vec<Effect> {
    fn emit(&mut self, effect: Effect) {
        self.push(effect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_method_tags_match_serde_names() {
        let methods = [
            DetectionMethod::Request,
            DetectionMethod::Cookie,
            DetectionMethod::Javascript,
            DetectionMethod::Global,
            DetectionMethod::DataLayer,
            DetectionMethod::Gtm,
            DetectionMethod::Measurement,
            DetectionMethod::DynamicScript,
            DetectionMethod::ZombieStorage,
        ];
        for method in methods {
            assert_eq!(serde_json::to_value(method).unwrap(), method.as_str());
        }
        let unknown: Result<DetectionMethod, _> = serde_json::from_str(r#""beacon""#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_request_type_main_frame_not_inspected() {
        assert!(!RequestType::INSPECTED.contains(RequestType::from_browser_str("main_frame")));
        assert!(RequestType::INSPECTED.contains(RequestType::from_browser_str("script")));
        assert!(RequestType::INSPECTED.contains(RequestType::from_browser_str("something-new")));
    }

    #[test]
    fn test_artifact_deserializes_from_extension_json() {
        let json = r#"{"kind":"cookie","cookieName":"_ga","cookieValue":"GA1.2.123.456","domain":".news.example","sourceHostname":"news.example","timestamp":1000}"#;
        let artifact: Artifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.kind, Some(ArtifactKind::Cookie));
        assert_eq!(artifact.cookie_name.as_deref(), Some("_ga"));
        assert!(!artifact.removed);
        assert_eq!(artifact.timestamp, 1000);
    }

    #[test]
    fn test_decision_constructors() {
        let d = BlockingDecision::network_level("doubleclick.net");
        assert!(d.should_block && d.register_for_export);
        let d = BlockingDecision::browser_only("news.example");
        assert!(d.should_block && !d.register_for_export);
        let d = BlockingDecision::allow("news.example");
        assert!(!d.should_block);
        assert_eq!(d.blocking_method, BlockingMethod::None);
    }
}
