//! Replay a JSONL artifact trace through the engine.
//!
//! Artifacts are processed one at a time on a single task. A flush timer
//! runs alongside and saves the engine state when it is dirty; after a
//! failed save the delay doubles up to a cap and resets on the next success.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

use tg_core::{Artifact, DetectionEngine, Disposition, Effect, SignatureCatalog};

use crate::state::JsonFileStore;

pub struct ReplayOptions {
    pub trace_path: String,
    pub state_path: String,
    pub flush_interval: Duration,
    pub max_backoff: Duration,
    /// Delay between artifacts, to let flushes interleave with processing.
    pub pace: Duration,
    pub verbose: bool,
}

/// Flush delay with capped doubling after failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self { base, max, current: base }
    }

    pub fn delay(&self) -> Duration {
        self.current
    }

    pub fn on_success(&mut self) {
        self.current = self.base;
    }

    pub fn on_failure(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }
}

#[derive(Debug, Default)]
struct ReplayReport {
    lines: usize,
    skipped: usize,
    dispositions: BTreeMap<&'static str, usize>,
    effects: BTreeMap<&'static str, usize>,
    flushes: usize,
    failed_flushes: usize,
    last_timestamp: u64,
}

fn disposition_name(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Registered => "registered",
        Disposition::BlockedOnly => "blocked_only",
        Disposition::Allowed => "allowed",
    }
}

fn effect_name(effect: &Effect) -> &'static str {
    match effect {
        Effect::RemoveCookie { .. } => "removeCookie",
        Effect::RemoveStorageItem { .. } => "removeStorageItem",
        Effect::SuggestExport { .. } => "suggestExport",
    }
}

/// Parse one trace line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_trace_line(line: &str) -> Result<Option<Artifact>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some).map_err(|e| e.to_string())
}

pub fn run_replay(opts: ReplayOptions) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(run_replay_async(opts))
}

async fn run_replay_async(opts: ReplayOptions) -> Result<(), String> {
    let file = tokio::fs::File::open(&opts.trace_path)
        .await
        .map_err(|e| format!("Failed to open '{}': {}", opts.trace_path, e))?;
    let mut lines = BufReader::new(file).lines();

    let mut store = JsonFileStore::new(&opts.state_path);
    let mut engine = DetectionEngine::load_from(SignatureCatalog::builtin(), &mut store);
    let mut backoff = Backoff::new(opts.flush_interval, opts.max_backoff);
    let mut next_flush = Instant::now() + backoff.delay();
    let mut report = ReplayReport::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line.map_err(|e| format!("Failed to read '{}': {}", opts.trace_path, e))? {
                    Some(line) => line,
                    None => break,
                };
                report.lines += 1;
                let artifact = match parse_trace_line(&line) {
                    Ok(Some(artifact)) => artifact,
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("line {}: {}", report.lines, e);
                        report.skipped += 1;
                        continue;
                    }
                };
                process(&mut engine, &artifact, &mut report, opts.verbose);
                if !opts.pace.is_zero() {
                    tokio::time::sleep(opts.pace).await;
                }
            }
            _ = tokio::time::sleep_until(next_flush) => {
                engine.run_maintenance(report.last_timestamp);
                flush(&mut engine, &mut store, &mut backoff, &mut report);
                next_flush = Instant::now() + backoff.delay();
            }
        }
    }

    engine.run_maintenance(report.last_timestamp);
    flush(&mut engine, &mut store, &mut backoff, &mut report);
    print_report(&engine, &report, &opts.state_path);

    if engine.is_dirty() {
        return Err(format!("Final state was not saved to '{}'", opts.state_path));
    }
    Ok(())
}

fn process(engine: &mut DetectionEngine, artifact: &Artifact, report: &mut ReplayReport, verbose: bool) {
    let mut effects = Vec::new();
    let outcome = engine.handle(artifact, &mut effects);
    report.last_timestamp = report.last_timestamp.max(artifact.timestamp);

    *report.dispositions.entry(disposition_name(outcome.disposition)).or_default() += 1;
    for effect in &effects {
        *report.effects.entry(effect_name(effect)).or_default() += 1;
        if let Effect::SuggestExport { exportable } = effect {
            println!("Export suggested: {} exportable domains", exportable);
        }
    }

    if verbose {
        let line = serde_json::json!({ "line": report.lines, "outcome": outcome, "effects": effects });
        println!("{}", line);
    }
}

fn flush(engine: &mut DetectionEngine, store: &mut JsonFileStore, backoff: &mut Backoff, report: &mut ReplayReport) {
    match engine.flush(store) {
        Ok(true) => {
            report.flushes += 1;
            backoff.on_success();
        }
        Ok(false) => backoff.on_success(),
        Err(e) => {
            report.failed_flushes += 1;
            backoff.on_failure();
            log::warn!("flush to {} failed, retrying in {:?}: {}", store.path().display(), backoff.delay(), e);
        }
    }
}

fn print_report(engine: &DetectionEngine, report: &ReplayReport, state_path: &str) {
    let stats = engine.stats();
    println!("Replayed {} line(s) ({} skipped)", report.lines, report.skipped);
    for (name, count) in &report.dispositions {
        println!("  {:<14} {}", name, count);
    }
    for (name, count) in &report.effects {
        println!("  {:<14} {}", name, count);
    }
    println!("Stats:");
    println!("  Blocked requests:    {}", stats.blocked_requests);
    println!("  Deleted cookies:     {}", stats.deleted_cookies);
    println!("  Browser-only blocks: {}", stats.browser_only_blocks);
    println!("  Script detections:   {}", stats.script_detections);
    println!("  Zombie detections:   {}", stats.zombie_detections);
    println!("  Deduplicated:        {}", stats.deduplicated_requests);
    println!("  Faults (allowed):    {}", stats.errors);
    println!("Registry: {} entries, {} exportable", engine.registry().len(), engine.exportable_count());
    println!(
        "State: '{}' ({} flush(es), {} failed)",
        state_path, report.flushes, report.failed_flushes
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::ArtifactKind;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(3), Duration::from_secs(20));
        assert_eq!(backoff.delay(), Duration::from_secs(3));
        backoff.on_failure();
        assert_eq!(backoff.delay(), Duration::from_secs(6));
        backoff.on_failure();
        backoff.on_failure();
        assert_eq!(backoff.delay(), Duration::from_secs(20));
        backoff.on_success();
        assert_eq!(backoff.delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_max_below_base() {
        let mut backoff = Backoff::new(Duration::from_secs(3), Duration::from_secs(1));
        backoff.on_failure();
        assert_eq!(backoff.delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_trace_line() {
        assert_eq!(parse_trace_line("   "), Ok(None));
        assert_eq!(parse_trace_line("# comment"), Ok(None));
        let artifact = parse_trace_line(
            r#"{"kind":"request","url":"https://bat.bing.com/action/0","requestType":"script","sourceHostname":"a.example","timestamp":5}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(artifact.kind, Some(ArtifactKind::Request));
        assert_eq!(artifact.timestamp, 5);
        assert!(parse_trace_line("{broken").is_err());
    }

    #[test]
    fn test_sample_trace_exercises_every_path() {
        let trace = include_str!("../../../demos/sample-trace.jsonl");
        let mut engine = DetectionEngine::new(SignatureCatalog::builtin(), tg_core::Settings::default());
        let mut report = ReplayReport::default();
        for line in trace.lines() {
            report.lines += 1;
            if let Some(artifact) = parse_trace_line(line).unwrap() {
                process(&mut engine, &artifact, &mut report, false);
            }
        }

        let stats = engine.stats();
        assert_eq!(stats.deduplicated_requests, 1);
        assert_eq!(stats.deleted_cookies, 1);
        assert_eq!(stats.zombie_detections, 1);
        assert_eq!(stats.browser_only_blocks, 1);
        assert_eq!(report.effects.get("removeStorageItem"), Some(&1));
        assert!(engine.registry().contains_key("shop.example_zombie"));
        assert_eq!(engine.exportable_keys(), vec!["connect.facebook.net", "google-analytics.com"]);
        assert_eq!(report.last_timestamp, 2500);
    }
}
