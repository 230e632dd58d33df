//! TrackGuard Blocklist Export
//!
//! This crate serializes the engine's export-eligible domains into blocklist
//! files for network-level blockers (Pi-hole, NextDNS, hosts files, AdGuard).
//! Only keys the registry reports as exportable ever reach a file.

pub mod domains;
pub mod formats;

use chrono::{DateTime, Utc};
use tg_core::{DetectionEngine, ExportFormat};

pub use domains::{is_exportable_hostname, prepare_domains};

/// A rendered blocklist ready to be saved or downloaded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExportFile {
    pub content: String,
    pub filename: String,
    /// Number of domains in `content`.
    pub domains: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to encode {format} export: {source}")]
    Encode {
        format: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn extension(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Nextdns => "json",
        ExportFormat::Pihole | ExportFormat::Hosts | ExportFormat::Adguard => "txt",
    }
}

/// `trackguard-<format>-<YYYY-MM-DD>.<ext>`
pub fn export_filename(format: ExportFormat, generated_at: DateTime<Utc>) -> String {
    format!(
        "trackguard-{}-{}.{}",
        format.as_str(),
        generated_at.format("%Y-%m-%d"),
        extension(format)
    )
}

/// Render `keys` in `format`. Keys are normalized, sorted and deduplicated first.
pub fn export_blocklist<I, S>(keys: I, format: ExportFormat, generated_at: DateTime<Utc>) -> Result<ExportFile, ExportError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let domains = prepare_domains(keys);
    let content = match format {
        ExportFormat::Pihole => formats::render_pihole(&domains, generated_at),
        ExportFormat::Hosts => formats::render_hosts(&domains, generated_at),
        ExportFormat::Adguard => formats::render_adguard(&domains, generated_at),
        ExportFormat::Nextdns => formats::render_nextdns(&domains).map_err(|source| ExportError::Encode {
            format: format.as_str(),
            source,
        })?,
    };
    log::debug!("rendered {} export with {} domains", format.as_str(), domains.len());

    Ok(ExportFile {
        content,
        filename: export_filename(format, generated_at),
        domains: domains.len(),
    })
}

/// Export the engine's current export-eligible domains.
pub fn export_engine(engine: &DetectionEngine, format: ExportFormat, generated_at: DateTime<Utc>) -> Result<ExportFile, ExportError> {
    export_blocklist(engine.exportable_keys(), format, generated_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::{Artifact, Disposition, Settings, SignatureCatalog};

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_filename_carries_format_and_date() {
        assert_eq!(export_filename(ExportFormat::Hosts, at()), "trackguard-hosts-2023-11-14.txt");
        assert_eq!(export_filename(ExportFormat::Nextdns, at()), "trackguard-nextdns-2023-11-14.json");
    }

    #[test]
    fn test_empty_export_is_valid() {
        let file = export_blocklist(Vec::<String>::new(), ExportFormat::Pihole, at()).unwrap();
        assert_eq!(file.domains, 0);
        assert!(file.content.contains("# Domains: 0"));
    }

    #[test]
    fn test_only_third_party_domains_exported() {
        let mut engine = DetectionEngine::new(SignatureCatalog::builtin(), Settings::default());
        let mut effects = Vec::new();
        let t = 1_700_000_000_000;

        // Third-party request: export-eligible.
        engine.handle(&Artifact::request("https://www.google-analytics.com/g/collect?v=2", "ping", "news.example", t), &mut effects);
        // Self-hosted tag manager: browser-only.
        let self_hosted = engine.handle(
            &Artifact::request("https://news.example/gtm.js?id=GTM-ABCD", "script", "news.example", t),
            &mut effects,
        );
        assert!(self_hosted.should_block);
        assert_eq!(self_hosted.disposition, Disposition::BlockedOnly);
        // First-party cookie and inline script: recorded, never exported.
        engine.handle(&Artifact::cookie("_ga", "GA1.2.1.1", ".news.example", "news.example", t), &mut effects);
        engine.handle(&Artifact::script("gtag('config','G-1')", "news.example", t), &mut effects);
        engine.handle(&Artifact::zombie_storage("_fbp", "fb.1.2.3", "news.example", t), &mut effects);

        for format in [ExportFormat::Pihole, ExportFormat::Hosts, ExportFormat::Adguard, ExportFormat::Nextdns] {
            let file = export_engine(&engine, format, at()).unwrap();
            assert_eq!(file.domains, 1, "{:?}", format);
            assert!(file.content.contains("google-analytics.com"));
            assert!(!file.content.contains("news.example"), "{:?}", format);
        }
    }
}
