//! Settings
//!
//! Owned and edited by the options page; consumed by the resolver and the
//! registry. Every load and every update is validated as a whole, and an
//! invalid candidate is rejected (never clamped) so the engine keeps running
//! on its last-known-good settings.

use serde::{Deserialize, Serialize};

pub const MIN_HOSTS_ENTRIES: usize = 50;
pub const MAX_HOSTS_ENTRIES: usize = 10_000;
pub const MIN_AUTO_EXPORT_THRESHOLD: usize = 10;

/// Detection sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

/// Blocklist export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pihole,
    Nextdns,
    #[default]
    Hosts,
    Adguard,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pihole => "pihole",
            Self::Nextdns => "nextdns",
            Self::Hosts => "hosts",
            Self::Adguard => "adguard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pihole" | "pi-hole" => Some(Self::Pihole),
            "nextdns" => Some(Self::Nextdns),
            "hosts" => Some(Self::Hosts),
            "adguard" => Some(Self::Adguard),
            _ => None,
        }
    }
}

/// Rejected settings value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("maxHostsEntries must be between 50 and 10000, got {0}")]
    MaxHostsEntriesOutOfRange(usize),
    #[error("autoExportThreshold must be at least 10, got {0}")]
    AutoExportThresholdTooLow(usize),
    #[error("autoExportThreshold ({threshold}) must be below maxHostsEntries ({max_entries})")]
    AutoExportThresholdNotBelowMax { threshold: usize, max_entries: usize },
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub detection_sensitivity: Sensitivity,
    pub block_self_hosted: bool,
    pub max_hosts_entries: usize,
    pub auto_export_threshold: usize,
    pub auto_cleanup: bool,
    pub export_format: ExportFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_sensitivity: Sensitivity::Medium,
            block_self_hosted: true,
            max_hosts_entries: 500,
            auto_export_threshold: 450,
            auto_cleanup: true,
            export_format: ExportFormat::Hosts,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_HOSTS_ENTRIES..=MAX_HOSTS_ENTRIES).contains(&self.max_hosts_entries) {
            return Err(SettingsError::MaxHostsEntriesOutOfRange(self.max_hosts_entries));
        }
        if self.auto_export_threshold < MIN_AUTO_EXPORT_THRESHOLD {
            return Err(SettingsError::AutoExportThresholdTooLow(self.auto_export_threshold));
        }
        if self.auto_export_threshold >= self.max_hosts_entries {
            return Err(SettingsError::AutoExportThresholdNotBelowMax {
                threshold: self.auto_export_threshold,
                max_entries: self.max_hosts_entries,
            });
        }
        Ok(())
    }
}

/// Partial update from the options page. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub detection_sensitivity: Option<Sensitivity>,
    pub block_self_hosted: Option<bool>,
    pub max_hosts_entries: Option<usize>,
    pub auto_export_threshold: Option<usize>,
    pub auto_cleanup: Option<bool>,
    pub export_format: Option<ExportFormat>,
}

impl SettingsPatch {
    fn apply_to(&self, base: &Settings) -> Settings {
        Settings {
            detection_sensitivity: self.detection_sensitivity.unwrap_or(base.detection_sensitivity),
            block_self_hosted: self.block_self_hosted.unwrap_or(base.block_self_hosted),
            max_hosts_entries: self.max_hosts_entries.unwrap_or(base.max_hosts_entries),
            auto_export_threshold: self.auto_export_threshold.unwrap_or(base.auto_export_threshold),
            auto_cleanup: self.auto_cleanup.unwrap_or(base.auto_cleanup),
            export_format: self.export_format.unwrap_or(base.export_format),
        }
    }
}

/// Holder of the last-known-good settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    current: Settings,
}

impl SettingsStore {
    /// Start from stored settings, falling back to defaults when they are invalid.
    pub fn load(candidate: Settings) -> Self {
        match candidate.validate() {
            Ok(()) => Self { current: candidate },
            Err(e) => {
                log::warn!("stored settings rejected, using defaults: {}", e);
                Self::default()
            }
        }
    }

    pub fn current(&self) -> &Settings {
        &self.current
    }

    /// Replace all settings. The previous settings stay active on error.
    pub fn replace(&mut self, candidate: Settings) -> Result<(), SettingsError> {
        candidate.validate()?;
        self.current = candidate;
        Ok(())
    }

    /// Merge a partial update. The previous settings stay active on error.
    pub fn update(&mut self, patch: &SettingsPatch) -> Result<&Settings, SettingsError> {
        let candidate = patch.apply_to(&self.current);
        self.replace(candidate)?;
        Ok(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(Settings::default().validate(), Ok(()));
    }

    #[test]
    fn test_max_hosts_entries_range() {
        for bad in [0, 49, 10_001] {
            let s = Settings {
                max_hosts_entries: bad,
                auto_export_threshold: 10,
                ..Settings::default()
            };
            assert_eq!(s.validate(), Err(SettingsError::MaxHostsEntriesOutOfRange(bad)));
        }
        let s = Settings {
            max_hosts_entries: 50,
            auto_export_threshold: 10,
            ..Settings::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_threshold_must_stay_below_max() {
        let s = Settings {
            max_hosts_entries: 500,
            auto_export_threshold: 500,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(SettingsError::AutoExportThresholdNotBelowMax { .. })));

        let s = Settings {
            auto_export_threshold: 9,
            ..Settings::default()
        };
        assert_eq!(s.validate(), Err(SettingsError::AutoExportThresholdTooLow(9)));
    }

    #[test]
    fn test_rejected_update_keeps_last_known_good() {
        let mut store = SettingsStore::default();
        let patch = SettingsPatch {
            detection_sensitivity: Some(Sensitivity::High),
            max_hosts_entries: Some(20_000),
            ..SettingsPatch::default()
        };
        assert!(store.update(&patch).is_err());
        assert_eq!(store.current(), &Settings::default());

        let patch = SettingsPatch {
            detection_sensitivity: Some(Sensitivity::High),
            max_hosts_entries: Some(1000),
            ..SettingsPatch::default()
        };
        let updated = store.update(&patch).unwrap();
        assert_eq!(updated.detection_sensitivity, Sensitivity::High);
        assert_eq!(updated.max_hosts_entries, 1000);
        assert_eq!(updated.auto_export_threshold, 450);
    }

    #[test]
    fn test_invalid_stored_settings_fall_back_to_defaults() {
        let stored = Settings {
            max_hosts_entries: 5,
            ..Settings::default()
        };
        assert_eq!(SettingsStore::load(stored).current(), &Settings::default());
    }

    #[test]
    fn test_settings_json_names() {
        let json = r#"{"detectionSensitivity":"low","blockSelfHosted":false,"maxHostsEntries":800,"autoExportThreshold":700,"autoCleanup":false,"exportFormat":"pihole"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.detection_sensitivity, Sensitivity::Low);
        assert!(!s.block_self_hosted);
        assert_eq!(s.export_format, ExportFormat::Pihole);
        assert!(s.validate().is_ok());

        let partial: Settings = serde_json::from_str(r#"{"maxHostsEntries":1000}"#).unwrap();
        assert_eq!(partial.auto_export_threshold, 450);
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!(ExportFormat::parse("Pi-hole"), Some(ExportFormat::Pihole));
        assert_eq!(ExportFormat::parse("adguard"), Some(ExportFormat::Adguard));
        assert_eq!(ExportFormat::parse("csv"), None);
    }
}
