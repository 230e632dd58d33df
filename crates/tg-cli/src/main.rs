//! TrackGuard CLI
//!
//! CLI tool for classifying artifacts, replaying traces through the
//! detection engine, and exporting blocklists from saved state.

mod logging;
mod replay;
mod state;

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};

use tg_core::registry::ZOMBIE_SUFFIX;
use tg_core::{is_third_party, Artifact, DetectionEngine, ExportFormat, Settings, SignatureCatalog};

use crate::replay::ReplayOptions;

#[derive(Parser)]
#[command(name = "tg-cli")]
#[command(about = "TrackGuard tracker detection and blocklist tools")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a single artifact with a fresh engine
    #[command(group(ArgGroup::new("artifact").required(true).args(["url", "cookie", "script", "global"])))]
    Classify {
        /// Request URL
        #[arg(long)]
        url: Option<String>,

        /// Request type for --url
        #[arg(long = "type", default_value = "script")]
        request_type: String,

        /// Cookie as NAME=VALUE
        #[arg(long)]
        cookie: Option<String>,

        /// Cookie domain for --cookie (defaults to --source)
        #[arg(long)]
        domain: Option<String>,

        /// File with inline script text
        #[arg(long)]
        script: Option<String>,

        /// Page global name
        #[arg(long)]
        global: Option<String>,

        /// Page host the artifact was seen on
        #[arg(long, default_value = "example.com")]
        source: String,

        /// Settings JSON file
        #[arg(long)]
        settings: Option<String>,
    },

    /// Replay a JSONL artifact trace, flushing state periodically
    Replay {
        /// Trace file, one artifact JSON object per line
        #[arg(short, long)]
        trace: String,

        /// State file to restore from and flush to
        #[arg(short, long, default_value = "trackguard-state.json")]
        state: String,

        /// Flush interval in milliseconds
        #[arg(long, default_value_t = 3000)]
        flush_interval_ms: u64,

        /// Upper bound for the flush delay after failures
        #[arg(long, default_value_t = 60_000)]
        max_backoff_ms: u64,

        /// Delay between artifacts in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },

    /// Export the exportable domains of a saved state
    Export {
        /// State file
        #[arg(short, long, default_value = "trackguard-state.json")]
        state: String,

        /// pihole, nextdns, hosts or adguard (defaults to the saved setting)
        #[arg(short, long)]
        format: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out_dir: String,

        /// Print to stdout instead of writing a file
        #[arg(long)]
        stdout: bool,
    },

    /// Validate a settings JSON file
    Settings {
        /// Settings file
        #[arg(short, long)]
        input: String,
    },

    /// Show stats and the most recent detections of a saved state
    Stats {
        /// State file
        #[arg(short, long, default_value = "trackguard-state.json")]
        state: String,

        /// Number of recent records to list
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Classify {
            url,
            request_type,
            cookie,
            domain,
            script,
            global,
            source,
            settings,
        } => {
            let input = ClassifyInput {
                url,
                request_type,
                cookie,
                domain,
                script,
                global,
                source,
            };
            cmd_classify(&input, settings.as_deref())
        }
        Commands::Replay {
            trace,
            state,
            flush_interval_ms,
            max_backoff_ms,
            pace_ms,
        } => replay::run_replay(ReplayOptions {
            trace_path: trace,
            state_path: state,
            flush_interval: Duration::from_millis(flush_interval_ms.max(1)),
            max_backoff: Duration::from_millis(max_backoff_ms),
            pace: Duration::from_millis(pace_ms),
            verbose: cli.verbose,
        }),
        Commands::Export {
            state,
            format,
            out_dir,
            stdout,
        } => cmd_export(&state, format.as_deref(), &out_dir, stdout),
        Commands::Settings { input } => cmd_settings(&input),
        Commands::Stats { state, top } => cmd_stats(&state, top),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

struct ClassifyInput {
    url: Option<String>,
    request_type: String,
    cookie: Option<String>,
    domain: Option<String>,
    script: Option<String>,
    global: Option<String>,
    source: String,
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn build_artifact(input: &ClassifyInput, now: u64) -> Result<Artifact, String> {
    let source = input.source.as_str();
    if let Some(url) = &input.url {
        return Ok(Artifact::request(url, &input.request_type, source, now));
    }
    if let Some(cookie) = &input.cookie {
        let (name, value) = cookie.split_once('=').unwrap_or((cookie.as_str(), ""));
        let domain = input.domain.as_deref().unwrap_or(source);
        return Ok(Artifact::cookie(name, value, domain, source, now));
    }
    if let Some(path) = &input.script {
        let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        return Ok(Artifact::script(&text, source, now));
    }
    if let Some(name) = &input.global {
        return Ok(Artifact::global(name, source, now));
    }
    Err("No artifact specified".to_string())
}

fn cmd_classify(input: &ClassifyInput, settings_path: Option<&str>) -> Result<(), String> {
    let settings = match settings_path {
        Some(path) => {
            let settings = state::read_settings(path)?;
            settings.validate().map_err(|e| format!("Invalid settings: {}", e))?;
            settings
        }
        None => Settings::default(),
    };

    let artifact = build_artifact(input, now_ms())?;
    let mut engine = DetectionEngine::new(SignatureCatalog::builtin(), settings);
    let mut effects = Vec::new();
    let outcome = engine.handle(&artifact, &mut effects);

    let registered: Vec<&str> = engine.snapshot(usize::MAX).into_iter().map(|(key, _)| key).collect();
    let report = serde_json::json!({
        "outcome": outcome,
        "effects": effects,
        "registered": registered,
        "exportable": engine.exportable_keys(),
    });
    let text = serde_json::to_string_pretty(&report).map_err(|e| format!("Failed to encode result: {}", e))?;
    println!("{}", text);
    Ok(())
}

fn cmd_export(state_path: &str, format: Option<&str>, out_dir: &str, to_stdout: bool) -> Result<(), String> {
    let saved = state::read_state(state_path)?;
    let engine = DetectionEngine::restore(SignatureCatalog::builtin(), saved);

    let format = match format {
        Some(name) => ExportFormat::parse(name).ok_or_else(|| format!("Unknown export format '{}'", name))?,
        None => engine.settings().export_format,
    };

    let file = tg_export::export_engine(&engine, format, Utc::now()).map_err(|e| e.to_string())?;
    if to_stdout {
        print!("{}", file.content);
        return Ok(());
    }

    let out_dir = Path::new(out_dir);
    fs::create_dir_all(out_dir).map_err(|e| format!("Failed to create '{}': {}", out_dir.display(), e))?;
    let path = out_dir.join(&file.filename);
    fs::write(&path, &file.content).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;

    println!("Exported {} domain(s) to '{}'", file.domains, path.display());
    Ok(())
}

fn cmd_settings(input: &str) -> Result<(), String> {
    let settings = state::read_settings(input)?;
    settings.validate().map_err(|e| format!("Invalid settings: {}", e))?;

    println!("Settings '{}' are valid", input);
    println!("  Sensitivity:        {:?}", settings.detection_sensitivity);
    println!("  Block self-hosted:  {}", settings.block_self_hosted);
    println!("  Max hosts entries:  {}", settings.max_hosts_entries);
    println!("  Export threshold:   {}", settings.auto_export_threshold);
    println!("  Auto cleanup:       {}", settings.auto_cleanup);
    println!("  Export format:      {}", settings.export_format.as_str());
    Ok(())
}

fn cmd_stats(state_path: &str, top: usize) -> Result<(), String> {
    let saved = state::read_state(state_path)?;
    let engine = DetectionEngine::restore(SignatureCatalog::builtin(), saved);
    let stats = engine.stats();

    println!("State: {}", state_path);
    println!("  Registry:     {} entries ({} exportable)", engine.registry().len(), engine.exportable_count());
    println!("  Blocked:      {} requests, {} browser-only", stats.blocked_requests, stats.browser_only_blocks);
    println!("  Cookies:      {} deleted", stats.deleted_cookies);
    println!("  Scripts:      {} detections", stats.script_detections);
    println!("  Zombies:      {} detections", stats.zombie_detections);
    println!("  Faults:       {}", stats.errors);
    println!();

    println!("Recent:");
    for (key, record) in engine.snapshot(top) {
        let methods: Vec<&str> = record.methods.iter().map(|m| m.as_str()).collect();
        let host = key.strip_suffix(ZOMBIE_SUFFIX).unwrap_or(key);
        let party = if is_third_party(&record.source_domain, host) { "3p" } else { "1p" };
        println!(
            "  {:<40} {} x{:<6} {}  (via {})",
            key,
            party,
            record.frequency,
            methods.join(","),
            record.source_domain
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::ArtifactKind;

    fn input() -> ClassifyInput {
        ClassifyInput {
            url: None,
            request_type: "script".to_string(),
            cookie: None,
            domain: None,
            script: None,
            global: None,
            source: "news.example".to_string(),
        }
    }

    #[test]
    fn test_build_cookie_artifact() {
        let input = ClassifyInput {
            cookie: Some("_ga=GA1.2.3.4".to_string()),
            ..input()
        };
        let artifact = build_artifact(&input, 7).unwrap();
        assert_eq!(artifact.kind, Some(ArtifactKind::Cookie));
        assert_eq!(artifact.cookie_name.as_deref(), Some("_ga"));
        assert_eq!(artifact.cookie_value.as_deref(), Some("GA1.2.3.4"));
        assert_eq!(artifact.domain.as_deref(), Some("news.example"));
    }

    #[test]
    fn test_build_request_artifact() {
        let input = ClassifyInput {
            url: Some("https://bat.bing.com/action/0".to_string()),
            ..input()
        };
        let artifact = build_artifact(&input, 7).unwrap();
        assert_eq!(artifact.kind, Some(ArtifactKind::Request));
        assert_eq!(artifact.request_type.as_deref(), Some("script"));
    }

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from(["tg-cli", "replay", "--trace", "t.jsonl", "--pace-ms", "5"]).unwrap();
        match cli.command {
            Commands::Replay { trace, state, flush_interval_ms, pace_ms, .. } => {
                assert_eq!(trace, "t.jsonl");
                assert_eq!(state, "trackguard-state.json");
                assert_eq!(flush_interval_ms, 3000);
                assert_eq!(pace_ms, 5);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_classify_requires_an_artifact() {
        assert!(Cli::try_parse_from(["tg-cli", "classify"]).is_err());
        assert!(Cli::try_parse_from(["tg-cli", "classify", "--global", "fbq"]).is_ok());
    }
}
