//! TrackGuard Core Library
//!
//! This crate provides the tracker detection engine for the TrackGuard
//! extension. It classifies observed artifacts (network requests, cookies,
//! script text, page globals), decides how each detection is blocked, and
//! keeps a bounded registry of tracker domains eligible for network-level
//! blocklist export.
//!
//! # Architecture
//!
//! The signature catalog is compiled once from a declarative table and is
//! immutable afterwards. A single [`DetectionEngine`] owns the catalog, the
//! settings and the registry; hosts feed it artifacts and carry out the
//! [`Effect`]s it emits. The engine does no I/O of its own.
//!
//! # Modules
//!
//! - `psl`: registrable-domain and host suffix helpers
//! - `url`: allocation-free URL parsing
//! - `catalog`: tracker signature catalog and known tracking domains
//! - `classifier`: stateless artifact classification
//! - `resolver`: blocking-target policy
//! - `registry`: bounded domain registry
//! - `pipeline`: the detection engine
//! - `settings`: validated configuration
//! - `persistence`: state store seam
//! - `types`: shared type definitions

pub mod catalog;
pub mod classifier;
pub mod error;
pub mod persistence;
pub mod pipeline;
pub mod psl;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use catalog::{KnownTrackingDomains, SignatureCatalog, SignatureKind};
pub use classifier::Classifier;
pub use error::EngineError;
pub use persistence::{MemoryStore, PersistedState, StateStore, StoreError};
pub use pipeline::{DetectionEngine, EngineStats, MaintenanceReport};
pub use psl::{is_third_party, registrable_domain};
pub use registry::{DetectionRecord, DomainRegistry};
pub use resolver::Resolver;
pub use settings::{ExportFormat, Sensitivity, Settings, SettingsError, SettingsPatch, SettingsStore};
pub use types::{
    Artifact, ArtifactKind, ArtifactOutcome, BlockingDecision, BlockingMethod, DetectionMethod, Disposition, Effect,
    EffectSink, RequestType,
};
