//! Domain Registry
//!
//! The engine's only long-lived state: a bounded map from registry key to an
//! aggregate [`DetectionRecord`]. Zombie detections live under
//! `key + "_zombie"` so a host can carry both kinds of record at once.
//!
//! Capacity eviction is pure LRU on `last_seen`; the age sweep is
//! independent of capacity. Every mutation sets a dirty flag that the
//! persistence side polls; the registry itself does no I/O.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::KnownTrackingDomains;
use crate::error::EngineError;
use crate::types::DetectionMethod;

pub const ZOMBIE_SUFFIX: &str = "_zombie";
pub const MAX_SAMPLE_DETAILS: usize = 5;
pub const MAX_DETAIL_CHARS: usize = 200;
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;
pub const RETENTION_MS: u64 = 30 * DAY_MS;

/// Aggregate of every detection seen for one registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub first_seen: u64,
    pub last_seen: u64,
    pub frequency: u64,
    /// Insertion-ordered, no duplicates.
    pub methods: Vec<DetectionMethod>,
    /// First [`MAX_SAMPLE_DETAILS`] details only.
    pub sample_details: Vec<String>,
    /// Page host the tracker was first observed on.
    pub source_domain: String,
    #[serde(default)]
    pub is_zombie_cookie: bool,
}

impl DetectionRecord {
    fn new(method: DetectionMethod, detail: &str, source_domain: &str, now: u64, is_zombie_cookie: bool) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            frequency: 1,
            methods: vec![method],
            sample_details: vec![truncate_detail(detail)],
            source_domain: source_domain.to_string(),
            is_zombie_cookie,
        }
    }

    fn touch(&mut self, method: DetectionMethod, detail: &str, now: u64) {
        self.last_seen = self.last_seen.max(now);
        self.frequency += 1;
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        if self.sample_details.len() < MAX_SAMPLE_DETAILS {
            self.sample_details.push(truncate_detail(detail));
        }
    }

    pub fn has_method(&self, method: DetectionMethod) -> bool {
        self.methods.contains(&method)
    }
}

fn truncate_detail(detail: &str) -> String {
    match detail.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => detail[..idx].to_string(),
        None => detail.to_string(),
    }
}

/// Whether a `record_*` call created a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Created,
    Updated,
}

/// Bounded domain registry.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    entries: HashMap<String, DetectionRecord>,
    dirty: bool,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries. Empty keys are dropped. Starts clean.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, DetectionRecord)>,
    {
        let entries = entries
            .into_iter()
            .filter(|(key, _)| !key.trim().is_empty())
            .collect();
        Self { entries, dirty: false }
    }

    pub fn record_detection(
        &mut self,
        domain_key: &str,
        method: DetectionMethod,
        detail: &str,
        source_domain: &str,
        now: u64,
    ) -> Result<Recorded, EngineError> {
        if domain_key.trim().is_empty() {
            return Err(EngineError::InvalidRegistryKey(domain_key.to_string()));
        }
        Ok(self.upsert(domain_key.to_string(), method, detail, source_domain, now, false))
    }

    pub fn record_zombie_detection(
        &mut self,
        domain_key: &str,
        method: DetectionMethod,
        detail: &str,
        now: u64,
    ) -> Result<Recorded, EngineError> {
        if domain_key.trim().is_empty() {
            return Err(EngineError::InvalidRegistryKey(domain_key.to_string()));
        }
        let key = format!("{domain_key}{ZOMBIE_SUFFIX}");
        Ok(self.upsert(key, method, detail, domain_key, now, true))
    }

    fn upsert(
        &mut self,
        key: String,
        method: DetectionMethod,
        detail: &str,
        source_domain: &str,
        now: u64,
        is_zombie_cookie: bool,
    ) -> Recorded {
        self.dirty = true;
        match self.entries.get_mut(&key) {
            Some(record) => {
                record.touch(method, detail, now);
                Recorded::Updated
            }
            None => {
                let record = DetectionRecord::new(method, detail, source_domain, now, is_zombie_cookie);
                self.entries.insert(key, record);
                Recorded::Created
            }
        }
    }

    /// Drop the least recently seen entries until `len() <= max_entries`.
    /// Returns how many entries were removed.
    pub fn evict_if_over_capacity(&mut self, max_entries: usize) -> usize {
        if self.entries.len() <= max_entries {
            return 0;
        }
        let excess = self.entries.len() - max_entries;

        let mut by_age: Vec<(u64, &String)> = self.entries.iter().map(|(k, r)| (r.last_seen, k)).collect();
        by_age.sort();
        let victims: Vec<String> = by_age.into_iter().take(excess).map(|(_, k)| k.clone()).collect();

        for key in &victims {
            self.entries.remove(key);
        }
        self.dirty = true;
        log::debug!("evicted {} registry entries over capacity {}", victims.len(), max_entries);
        victims.len()
    }

    /// Remove every entry whose `last_seen` is older than `now - retention_ms`.
    pub fn sweep_expired(&mut self, retention_ms: u64, now: u64) -> usize {
        let cutoff = now.saturating_sub(retention_ms);
        let before = self.entries.len();
        self.entries.retain(|_, record| record.last_seen >= cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.dirty = true;
            log::debug!("swept {} expired registry entries", removed);
        }
        removed
    }

    /// The `n` most recently seen entries, newest first.
    pub fn snapshot(&self, n: usize) -> Vec<(&str, &DetectionRecord)> {
        let mut all: Vec<(&str, &DetectionRecord)> = self.entries.iter().map(|(k, r)| (k.as_str(), r)).collect();
        all.sort_by(|a, b| b.1.last_seen.cmp(&a.1.last_seen).then_with(|| a.0.cmp(b.0)));
        all.truncate(n);
        all
    }

    fn exportable<'s>(&'s self, known: &'s KnownTrackingDomains) -> impl Iterator<Item = &'s String> + 's {
        self.entries
            .iter()
            .filter(move |(key, record)| !record.is_zombie_cookie && !key.ends_with(ZOMBIE_SUFFIX) && known.contains(key))
            .map(|(key, _)| key)
    }

    /// Keys that are known third-party trackers, sorted. Zombie keys never qualify.
    pub fn exportable_keys(&self, known: &KnownTrackingDomains) -> Vec<String> {
        let mut keys: Vec<String> = self.exportable(known).cloned().collect();
        keys.sort();
        keys
    }

    pub fn exportable_count(&self, known: &KnownTrackingDomains) -> usize {
        self.exportable(known).count()
    }

    pub fn get(&self, key: &str) -> Option<&DetectionRecord> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DetectionRecord)> {
        self.entries.iter()
    }

    /// Full clear (user action).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    #[test]
    fn test_record_creates_then_updates() {
        let mut reg = DomainRegistry::new();
        let r = reg
            .record_detection("google-analytics.com", DetectionMethod::Request, "https://a/1", "news.example", T0)
            .unwrap();
        assert_eq!(r, Recorded::Created);
        let rec = reg.get("google-analytics.com").unwrap();
        assert_eq!(rec.frequency, 1);
        assert_eq!(rec.methods, vec![DetectionMethod::Request]);
        assert_eq!(rec.first_seen, T0);

        let r = reg
            .record_detection("google-analytics.com", DetectionMethod::Cookie, "_ga", "other.example", T0 + 10)
            .unwrap();
        assert_eq!(r, Recorded::Updated);
        reg.record_detection("google-analytics.com", DetectionMethod::Request, "https://a/2", "news.example", T0 + 20)
            .unwrap();

        let rec = reg.get("google-analytics.com").unwrap();
        assert_eq!(rec.frequency, 3);
        assert_eq!(rec.first_seen, T0);
        assert_eq!(rec.last_seen, T0 + 20);
        assert_eq!(rec.methods, vec![DetectionMethod::Request, DetectionMethod::Cookie]);
        assert_eq!(rec.source_domain, "news.example");
    }

    #[test]
    fn test_sample_details_keep_first_five() {
        let mut reg = DomainRegistry::new();
        for i in 0..8 {
            reg.record_detection("hotjar.com", DetectionMethod::Request, &format!("d{i}"), "s", T0 + i)
                .unwrap();
        }
        let rec = reg.get("hotjar.com").unwrap();
        assert_eq!(rec.sample_details, vec!["d0", "d1", "d2", "d3", "d4"]);
        assert_eq!(rec.frequency, 8);
    }

    #[test]
    fn test_detail_is_truncated() {
        let mut reg = DomainRegistry::new();
        let long = "x".repeat(1000);
        reg.record_detection("clarity.ms", DetectionMethod::Request, &long, "s", T0).unwrap();
        assert_eq!(reg.get("clarity.ms").unwrap().sample_details[0].len(), MAX_DETAIL_CHARS);
    }

    #[test]
    fn test_zombie_namespace_is_separate() {
        let mut reg = DomainRegistry::new();
        reg.record_detection("news.example", DetectionMethod::Cookie, "_ga", "news.example", T0).unwrap();
        reg.record_zombie_detection("news.example", DetectionMethod::ZombieStorage, "_ga backup", T0).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(!reg.get("news.example").unwrap().is_zombie_cookie);
        assert!(reg.get("news.example_zombie").unwrap().is_zombie_cookie);
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut reg = DomainRegistry::new();
        assert!(reg.record_detection("", DetectionMethod::Request, "x", "s", T0).is_err());
        assert!(reg.record_zombie_detection("  ", DetectionMethod::ZombieStorage, "x", T0).is_err());
        assert!(reg.is_empty());
        assert!(!reg.is_dirty());
    }

    #[test]
    fn test_eviction_removes_oldest_only() {
        let mut reg = DomainRegistry::new();
        reg.record_detection("a.example", DetectionMethod::Request, "", "s", 100).unwrap();
        reg.record_detection("b.example", DetectionMethod::Request, "", "s", 200).unwrap();
        reg.record_detection("c.example", DetectionMethod::Request, "", "s", 300).unwrap();
        assert_eq!(reg.evict_if_over_capacity(2), 1);
        assert!(!reg.contains_key("a.example"));
        assert!(reg.contains_key("b.example"));
        assert!(reg.contains_key("c.example"));
    }

    #[test]
    fn test_eviction_is_lru_not_frequency() {
        let mut reg = DomainRegistry::new();
        for i in 0..50 {
            reg.record_detection("busy.example", DetectionMethod::Request, "", "s", 100 + i).unwrap();
        }
        reg.record_detection("quiet.example", DetectionMethod::Request, "", "s", 1000).unwrap();
        reg.evict_if_over_capacity(1);
        assert!(reg.contains_key("quiet.example"));
        assert!(!reg.contains_key("busy.example"));
    }

    #[test]
    fn test_size_bounded_after_eviction() {
        let mut reg = DomainRegistry::new();
        for i in 0..1234u64 {
            reg.record_detection(&format!("t{i}.example"), DetectionMethod::Request, "", "s", (i * 7919) % 1000)
                .unwrap();
        }
        for max in [1000, 500, 50, 0] {
            reg.evict_if_over_capacity(max);
            assert!(reg.len() <= max);
        }
    }

    #[test]
    fn test_sweep_expired_boundary() {
        let now = T0 + 100 * DAY_MS;
        let mut reg = DomainRegistry::new();
        reg.record_detection("old.example", DetectionMethod::Request, "", "s", now - 31 * DAY_MS).unwrap();
        reg.record_detection("recent.example", DetectionMethod::Request, "", "s", now - 29 * DAY_MS).unwrap();
        assert_eq!(reg.sweep_expired(RETENTION_MS, now), 1);
        assert!(!reg.contains_key("old.example"));
        assert!(reg.contains_key("recent.example"));
    }

    #[test]
    fn test_snapshot_newest_first() {
        let mut reg = DomainRegistry::new();
        reg.record_detection("a.example", DetectionMethod::Request, "", "s", 100).unwrap();
        reg.record_detection("b.example", DetectionMethod::Request, "", "s", 300).unwrap();
        reg.record_detection("c.example", DetectionMethod::Request, "", "s", 200).unwrap();
        let keys: Vec<&str> = reg.snapshot(2).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b.example", "c.example"]);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_exportable_keys_only_known_third_party() {
        let known = KnownTrackingDomains::new(["doubleclick.net", "hotjar.com"]);
        let mut reg = DomainRegistry::new();
        reg.record_detection("doubleclick.net", DetectionMethod::Request, "", "s", T0).unwrap();
        reg.record_detection("static.hotjar.com", DetectionMethod::Request, "", "s", T0).unwrap();
        reg.record_detection("news.example", DetectionMethod::Cookie, "_ga", "news.example", T0).unwrap();
        reg.record_zombie_detection("hotjar.com", DetectionMethod::ZombieStorage, "", T0).unwrap();
        assert_eq!(reg.exportable_keys(&known), vec!["doubleclick.net", "static.hotjar.com"]);
    }

    #[test]
    fn test_dirty_flag() {
        let mut reg = DomainRegistry::new();
        assert!(!reg.is_dirty());
        reg.record_detection("a.example", DetectionMethod::Request, "", "s", T0).unwrap();
        assert!(reg.is_dirty());
        reg.mark_clean();
        assert_eq!(reg.sweep_expired(RETENTION_MS, T0), 0);
        assert!(!reg.is_dirty());
        reg.clear();
        assert!(reg.is_dirty());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_record_serializes_with_extension_names() {
        let mut reg = DomainRegistry::new();
        reg.record_detection("a.example", DetectionMethod::DataLayer, "dl", "s", 5).unwrap();
        let json = serde_json::to_value(reg.get("a.example").unwrap()).unwrap();
        assert_eq!(json["firstSeen"], 5);
        assert_eq!(json["methods"][0], "dataLayer");
        assert_eq!(json["isZombieCookie"], false);
    }
}
