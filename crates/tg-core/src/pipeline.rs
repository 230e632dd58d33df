//! Detection Pipeline
//!
//! One [`DetectionEngine`] instance owns all engine state: the catalog, the
//! settings, the registry, counters and the request dedup window. Hosts
//! construct it once and feed it artifacts through [`DetectionEngine::handle`].
//!
//! Each artifact goes `OBSERVED -> CLASSIFIED -> RESOLVED` and ends as
//! registered, blocked-only or allowed. Faults inside a single artifact are
//! caught at `handle` and turned into an allow; they never reach the host.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::SignatureCatalog;
use crate::classifier::Classifier;
use crate::error::EngineError;
use crate::persistence::{PersistedState, StateStore, StoreError};
use crate::registry::{DetectionRecord, DomainRegistry, Recorded, RETENTION_MS};
use crate::resolver::{is_self_hosted_path, Resolver};
use crate::settings::{Settings, SettingsError, SettingsPatch, SettingsStore};
use crate::types::{
    Artifact, ArtifactKind, ArtifactOutcome, BlockingDecision, DetectionMethod, Disposition, Effect, EffectSink,
    RequestType,
};
use crate::url::{normalize_host, parse_request_host};

/// Identical request URLs seen within this window are not re-processed.
pub const DEDUP_WINDOW_MS: u64 = 1000;
/// Dedup entries kept before an inline prune.
const DEDUP_PRUNE_LEN: usize = 1024;

// =============================================================================
// Statistics
// =============================================================================

/// Running counters, persisted with the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineStats {
    pub blocked_requests: u64,
    pub deleted_cookies: u64,
    pub browser_only_blocks: u64,
    pub script_detections: u64,
    pub zombie_detections: u64,
    /// Artifacts allowed because processing faulted.
    pub errors: u64,
    pub deduplicated_requests: u64,
}

/// What a maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub evicted: usize,
    pub expired: usize,
}

#[derive(Debug, Clone)]
struct RecentRequest {
    seen_at: u64,
    outcome: ArtifactOutcome,
}

// =============================================================================
// Engine
// =============================================================================

/// The single engine instance.
#[derive(Debug)]
pub struct DetectionEngine {
    catalog: SignatureCatalog,
    settings: SettingsStore,
    registry: DomainRegistry,
    stats: EngineStats,
    /// Stats or settings changed since the last flush.
    state_dirty: bool,
    recent_requests: HashMap<String, RecentRequest>,
    /// Export suggestion already emitted for the current crossing.
    export_suggested: bool,
}

impl DetectionEngine {
    /// Create an engine. Invalid settings fall back to defaults.
    pub fn new(catalog: SignatureCatalog, settings: Settings) -> Self {
        Self {
            catalog,
            settings: SettingsStore::load(settings),
            registry: DomainRegistry::new(),
            stats: EngineStats::default(),
            state_dirty: false,
            recent_requests: HashMap::new(),
            export_suggested: false,
        }
    }

    /// Rebuild an engine from a persisted snapshot.
    pub fn restore(catalog: SignatureCatalog, state: PersistedState) -> Self {
        let mut engine = Self::new(catalog, state.settings);
        engine.registry = DomainRegistry::from_entries(state.entries);
        engine.stats = state.stats;
        engine.export_suggested = engine.exportable_count() > engine.settings().auto_export_threshold;
        log::debug!("restored {} registry entries", engine.registry.len());
        engine
    }

    /// Restore from a store, or start fresh when it is empty or unreadable.
    pub fn load_from(catalog: SignatureCatalog, store: &mut dyn StateStore) -> Self {
        match store.load() {
            Ok(Some(state)) => Self::restore(catalog, state),
            Ok(None) => Self::new(catalog, Settings::default()),
            Err(e) => {
                log::warn!("state load failed, starting empty: {}", e);
                Self::new(catalog, Settings::default())
            }
        }
    }

    // =========================================================================
    // Artifact boundary
    // =========================================================================

    /// Process one artifact. Never fails: faults are logged, counted and allowed.
    pub fn handle(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> ArtifactOutcome {
        match self.process(artifact, effects) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("artifact from {:?} failed open: {}", artifact.source_hostname, e);
                self.stats.errors += 1;
                self.state_dirty = true;
                ArtifactOutcome::allowed()
            }
        }
    }

    fn process(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        match artifact.kind.ok_or(EngineError::MissingKind)? {
            ArtifactKind::Request => self.process_request(artifact, effects),
            ArtifactKind::Cookie => self.process_cookie(artifact, effects),
            ArtifactKind::Script => self.process_script(artifact, effects),
            ArtifactKind::Global => self.process_global(artifact, effects),
            ArtifactKind::DataLayer => self.process_data_layer(artifact, effects),
            ArtifactKind::DynamicScript => self.process_dynamic_script(artifact, effects),
            ArtifactKind::ZombieStorage => self.process_zombie_storage(artifact, effects),
        }
    }

    fn process_request(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        let url = artifact.url.as_deref().unwrap_or_default();
        if url.is_empty() {
            return Ok(ArtifactOutcome::allowed());
        }
        let request_type = RequestType::from_browser_str(artifact.request_type.as_deref().unwrap_or("other"));
        if !RequestType::INSPECTED.intersects(request_type) {
            return Ok(ArtifactOutcome::allowed());
        }

        let now = artifact.timestamp;
        if let Some(recent) = self.recent_requests.get(url) {
            if now.saturating_sub(recent.seen_at) < DEDUP_WINDOW_MS {
                let outcome = recent.outcome.clone();
                self.stats.deduplicated_requests += 1;
                self.state_dirty = true;
                return Ok(outcome);
            }
        }

        let classified = {
            let classifier = Classifier::new(&self.catalog);
            let known = parse_request_host(url).is_some_and(|host| classifier.is_known_tracking_hostname(&normalize_host(host)));
            let family = classifier.classify_url(url).matched_family;
            if known || family.is_some() || is_self_hosted_path(url) {
                let source = normalize_host(&artifact.source_hostname);
                let decision = Resolver::new(classifier).resolve(&source, DetectionMethod::Request, url, self.settings.current())?;
                Some((decision, family.map(str::to_string)))
            } else {
                None
            }
        };
        let (decision, family) = match classified {
            Some(classified) => classified,
            None => return Ok(self.remember_request(url, now, ArtifactOutcome::allowed())),
        };

        if decision.should_block {
            self.stats.blocked_requests += 1;
            self.state_dirty = true;
        }
        let disposition = self.apply(&decision, DetectionMethod::Request, url, &artifact.source_hostname, now, effects)?;
        log::debug!("request {} -> {:?} ({})", url, disposition, decision.target_domain);

        let outcome = ArtifactOutcome {
            should_block: decision.should_block,
            disposition,
            matched_family: family,
        };
        Ok(self.remember_request(url, now, outcome))
    }

    fn remember_request(&mut self, url: &str, now: u64, outcome: ArtifactOutcome) -> ArtifactOutcome {
        if self.recent_requests.len() >= DEDUP_PRUNE_LEN {
            self.prune_recent(now);
        }
        self.recent_requests.insert(
            url.to_string(),
            RecentRequest {
                seen_at: now,
                outcome: outcome.clone(),
            },
        );
        outcome
    }

    fn process_cookie(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        if artifact.removed {
            return Ok(ArtifactOutcome::allowed());
        }
        let name = artifact.cookie_name.as_deref().unwrap_or_default();
        let value = artifact.cookie_value.as_deref().unwrap_or_default();
        let raw_domain = artifact
            .domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(artifact.source_hostname.as_str());

        let (decision, family) = {
            let classifier = Classifier::new(&self.catalog);
            let verdict = classifier.classify_cookie(name, value);
            let family = match verdict.matched_family {
                Some(family) if verdict.is_tracking_cookie => family,
                _ => return Ok(ArtifactOutcome::allowed()),
            };
            let key = normalize_host(raw_domain);
            let decision = Resolver::new(classifier).resolve(&key, DetectionMethod::Cookie, name, self.settings.current())?;
            (decision, family.to_string())
        };

        // Tracking cookies are deleted whatever the export decision.
        effects.emit(Effect::RemoveCookie {
            name: name.to_string(),
            domain: raw_domain.to_string(),
        });
        self.stats.deleted_cookies += 1;
        self.state_dirty = true;

        let source = normalize_host(&artifact.source_hostname);
        let recorded = self.registry.record_detection(
            &decision.target_domain,
            DetectionMethod::Cookie,
            name,
            &source,
            artifact.timestamp,
        )?;
        if recorded == Recorded::Created {
            self.after_creation(effects);
        }

        let disposition = if decision.register_for_export {
            Disposition::Registered
        } else {
            Disposition::BlockedOnly
        };
        log::debug!("cookie {} on {} -> {:?}", name, decision.target_domain, disposition);
        Ok(ArtifactOutcome {
            should_block: true,
            disposition,
            matched_family: Some(family),
        })
    }

    fn process_script(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        let text = artifact.script_text.as_deref().unwrap_or_default();
        let source = normalize_host(&artifact.source_hostname);

        let (verdict_family, detections) = {
            let classifier = Classifier::new(&self.catalog);
            let resolver = Resolver::new(classifier);
            let settings = self.settings.current();
            let verdict = classifier.classify_script_content(text);
            if !verdict.is_match() {
                return Ok(ArtifactOutcome::allowed());
            }

            let mut detections: Vec<(BlockingDecision, DetectionMethod, String)> = Vec::with_capacity(3);
            if let Some(family) = verdict.matched_family {
                let decision = resolver.resolve(&source, DetectionMethod::Javascript, family, settings)?;
                detections.push((decision, DetectionMethod::Javascript, family.to_string()));
            }
            if let Some(container) = verdict.gtm_container_id.as_deref() {
                let decision = resolver.resolve(&source, DetectionMethod::Gtm, container, settings)?;
                detections.push((decision, DetectionMethod::Gtm, container.to_string()));
            }
            if let Some(measurement) = verdict.measurement_url.as_deref() {
                let hint = parse_request_host(measurement).unwrap_or(source.as_str());
                let decision = resolver.resolve(hint, DetectionMethod::Measurement, measurement, settings)?;
                detections.push((decision, DetectionMethod::Measurement, measurement.to_string()));
            }
            (verdict.matched_family.map(str::to_string), detections)
        };

        self.stats.script_detections += 1;
        self.state_dirty = true;

        let mut outcome = ArtifactOutcome {
            matched_family: verdict_family,
            ..ArtifactOutcome::allowed()
        };
        for (decision, method, detail) in &detections {
            let disposition = self.apply(decision, *method, detail, &artifact.source_hostname, artifact.timestamp, effects)?;
            outcome.should_block |= decision.should_block;
            outcome.disposition = strongest(outcome.disposition, disposition);
        }
        log::debug!("script on {} -> {:?}", source, outcome.disposition);
        Ok(outcome)
    }

    fn process_global(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        let name = artifact.global_name.as_deref().unwrap_or_default();
        let source = normalize_host(&artifact.source_hostname);

        let (decision, family) = {
            let classifier = Classifier::new(&self.catalog);
            let family = match classifier.classify_global(name) {
                Some(family) => family,
                None => return Ok(ArtifactOutcome::allowed()),
            };
            let decision = Resolver::new(classifier).resolve(&source, DetectionMethod::Global, name, self.settings.current())?;
            (decision, family.to_string())
        };

        self.stats.script_detections += 1;
        self.state_dirty = true;
        let disposition = self.apply(&decision, DetectionMethod::Global, name, &artifact.source_hostname, artifact.timestamp, effects)?;
        Ok(ArtifactOutcome {
            should_block: decision.should_block,
            disposition,
            matched_family: Some(family),
        })
    }

    fn process_data_layer(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        let source = normalize_host(&artifact.source_hostname);
        let decision = Resolver::new(Classifier::new(&self.catalog)).resolve(
            &source,
            DetectionMethod::DataLayer,
            "dataLayer",
            self.settings.current(),
        )?;

        self.stats.script_detections += 1;
        self.state_dirty = true;
        let disposition = self.apply(
            &decision,
            DetectionMethod::DataLayer,
            "dataLayer",
            &artifact.source_hostname,
            artifact.timestamp,
            effects,
        )?;
        Ok(ArtifactOutcome {
            should_block: decision.should_block,
            disposition,
            matched_family: None,
        })
    }

    fn process_dynamic_script(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        let src = artifact.url.as_deref().unwrap_or_default();
        let host = match parse_request_host(src) {
            Some(host) => normalize_host(host),
            None => return Ok(ArtifactOutcome::allowed()),
        };

        let (decision, family) = {
            let classifier = Classifier::new(&self.catalog);
            let known = classifier.is_known_tracking_hostname(&host);
            let family = classifier.classify_url(src).matched_family;
            if !known && family.is_none() {
                return Ok(ArtifactOutcome::allowed());
            }
            let decision = Resolver::new(classifier).resolve(&host, DetectionMethod::DynamicScript, src, self.settings.current())?;
            (decision, family.map(str::to_string))
        };

        self.stats.script_detections += 1;
        self.state_dirty = true;
        let disposition = self.apply(&decision, DetectionMethod::DynamicScript, src, &artifact.source_hostname, artifact.timestamp, effects)?;
        Ok(ArtifactOutcome {
            should_block: decision.should_block,
            disposition,
            matched_family: family,
        })
    }

    fn process_zombie_storage(&mut self, artifact: &Artifact, effects: &mut dyn EffectSink) -> Result<ArtifactOutcome, EngineError> {
        let key = artifact.storage_key.as_deref().unwrap_or_default();
        let value = artifact.storage_value.as_deref().unwrap_or_default();

        let family = {
            let verdict = Classifier::new(&self.catalog).classify_cookie(key, value);
            match verdict.matched_family {
                Some(family) if verdict.is_tracking_cookie => family.to_string(),
                _ => return Ok(ArtifactOutcome::allowed()),
            }
        };

        let host = normalize_host(&artifact.source_hostname);
        if host.is_empty() {
            return Err(EngineError::MissingTarget {
                method: DetectionMethod::ZombieStorage.as_str(),
            });
        }

        let recorded = self
            .registry
            .record_zombie_detection(&host, DetectionMethod::ZombieStorage, key, artifact.timestamp)?;
        if recorded == Recorded::Created {
            self.after_creation(effects);
        }

        effects.emit(Effect::RemoveStorageItem {
            key: key.to_string(),
            host: artifact.source_hostname.clone(),
        });
        self.stats.zombie_detections += 1;
        self.state_dirty = true;
        log::debug!("zombie storage {} on {}", key, host);

        Ok(ArtifactOutcome {
            should_block: true,
            disposition: Disposition::BlockedOnly,
            matched_family: Some(family),
        })
    }

    /// Carry out a decision against the registry and counters.
    fn apply(
        &mut self,
        decision: &BlockingDecision,
        method: DetectionMethod,
        detail: &str,
        source_hostname: &str,
        now: u64,
        effects: &mut dyn EffectSink,
    ) -> Result<Disposition, EngineError> {
        if decision.register_for_export {
            let source = normalize_host(source_hostname);
            let recorded = self
                .registry
                .record_detection(&decision.target_domain, method, detail, &source, now)?;
            if recorded == Recorded::Created {
                self.after_creation(effects);
            }
            Ok(Disposition::Registered)
        } else if decision.should_block {
            self.stats.browser_only_blocks += 1;
            self.state_dirty = true;
            Ok(Disposition::BlockedOnly)
        } else {
            Ok(Disposition::Allowed)
        }
    }

    /// Inline eviction and the export-suggestion check after a new record.
    fn after_creation(&mut self, effects: &mut dyn EffectSink) {
        let max_entries = self.settings.current().max_hosts_entries;
        if self.registry.len() > max_entries {
            self.registry.evict_if_over_capacity(max_entries);
        }
        self.check_export_suggestion(Some(effects));
    }

    /// Emit `SuggestExport` once per crossing of the threshold.
    fn check_export_suggestion(&mut self, effects: Option<&mut dyn EffectSink>) {
        let threshold = self.settings.current().auto_export_threshold;
        let exportable = self.exportable_count();
        if exportable <= threshold {
            self.export_suggested = false;
            return;
        }
        if self.export_suggested {
            return;
        }
        if let Some(effects) = effects {
            log::debug!("{} exportable domains, suggesting export", exportable);
            effects.emit(Effect::SuggestExport { exportable });
            self.export_suggested = true;
        }
    }

    // =========================================================================
    // Maintenance and settings
    // =========================================================================

    /// Periodic housekeeping: capacity eviction, the age sweep (when
    /// `autoCleanup` is on) and pruning of the dedup window.
    pub fn run_maintenance(&mut self, now: u64) -> MaintenanceReport {
        let settings = self.settings.current();
        let max_entries = settings.max_hosts_entries;
        let auto_cleanup = settings.auto_cleanup;

        let evicted = self.registry.evict_if_over_capacity(max_entries);
        let expired = if auto_cleanup {
            self.registry.sweep_expired(RETENTION_MS, now)
        } else {
            0
        };
        self.prune_recent(now);
        self.check_export_suggestion(None);

        if evicted + expired > 0 {
            log::debug!("maintenance evicted {} and expired {} entries", evicted, expired);
        }
        MaintenanceReport { evicted, expired }
    }

    fn prune_recent(&mut self, now: u64) {
        self.recent_requests
            .retain(|_, recent| now.saturating_sub(recent.seen_at) < DEDUP_WINDOW_MS);
    }

    pub fn settings(&self) -> &Settings {
        self.settings.current()
    }

    /// Apply a partial settings update. Rejected updates leave the engine untouched.
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<&Settings, SettingsError> {
        if let Err(e) = self.settings.update(patch) {
            log::warn!("settings update rejected: {}", e);
            return Err(e);
        }
        self.state_dirty = true;

        let max_entries = self.settings.current().max_hosts_entries;
        self.registry.evict_if_over_capacity(max_entries);
        self.check_export_suggestion(None);
        Ok(self.settings.current())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn catalog(&self) -> &SignatureCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Export-eligible registry keys, sorted.
    pub fn exportable_keys(&self) -> Vec<String> {
        self.registry.exportable_keys(self.catalog.known_domains())
    }

    pub fn exportable_count(&self) -> usize {
        self.registry.exportable_count(self.catalog.known_domains())
    }

    /// The `n` most recently seen records, newest first.
    pub fn snapshot(&self, n: usize) -> Vec<(&str, &DetectionRecord)> {
        self.registry.snapshot(n)
    }

    /// Clear all detections (user action). Counters are kept.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.recent_requests.clear();
        self.export_suggested = false;
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub fn is_dirty(&self) -> bool {
        self.registry.is_dirty() || self.state_dirty
    }

    /// Snapshot of everything worth persisting. Entries are sorted by key.
    pub fn persisted_state(&self) -> PersistedState {
        let mut entries: Vec<(String, DetectionRecord)> =
            self.registry.iter().map(|(k, r)| (k.clone(), r.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        PersistedState {
            entries,
            settings: self.settings.current().clone(),
            stats: self.stats,
        }
    }

    /// Save when dirty. Returns whether a save happened. A failed save keeps
    /// the engine dirty so the next scheduled flush retries.
    pub fn flush(&mut self, store: &mut dyn StateStore) -> Result<bool, StoreError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        match store.save(&self.persisted_state()) {
            Ok(()) => {
                self.registry.mark_clean();
                self.state_dirty = false;
                Ok(true)
            }
            Err(e) => {
                log::warn!("state flush failed: {}", e);
                Err(e)
            }
        }
    }
}

fn strongest(a: Disposition, b: Disposition) -> Disposition {
    fn rank(d: Disposition) -> u8 {
        match d {
            Disposition::Allowed => 0,
            Disposition::BlockedOnly => 1,
            Disposition::Registered => 2,
        }
    }
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}
