//! Text renderings of a blocklist, one function per target.

use chrono::{DateTime, Utc};
use serde::Serialize;

const TITLE: &str = "TrackGuard tracker blocklist";

fn comment_header(prefix: &str, domains: &[String], generated_at: DateTime<Utc>) -> String {
    format!(
        "{prefix} {TITLE}\n{prefix} Generated: {}\n{prefix} Domains: {}\n",
        generated_at.to_rfc3339(),
        domains.len()
    )
}

/// Pi-hole adlist: one domain per line.
pub fn render_pihole(domains: &[String], generated_at: DateTime<Utc>) -> String {
    let mut out = comment_header("#", domains, generated_at);
    out.push('\n');
    for domain in domains {
        out.push_str(domain);
        out.push('\n');
    }
    out
}

/// hosts file: null-routed entries.
pub fn render_hosts(domains: &[String], generated_at: DateTime<Utc>) -> String {
    let mut out = comment_header("#", domains, generated_at);
    out.push('\n');
    for domain in domains {
        out.push_str("0.0.0.0 ");
        out.push_str(domain);
        out.push('\n');
    }
    out
}

/// AdGuard / uBO network rules.
pub fn render_adguard(domains: &[String], generated_at: DateTime<Utc>) -> String {
    let mut out = String::from("[Adblock Plus 2.0]\n");
    out.push_str(&comment_header("!", domains, generated_at));
    for domain in domains {
        out.push_str("||");
        out.push_str(domain);
        out.push_str("^\n");
    }
    out
}

#[derive(Serialize)]
struct NextDnsEntry<'a> {
    id: &'a str,
    active: bool,
}

#[derive(Serialize)]
struct NextDnsDenylist<'a> {
    denylist: Vec<NextDnsEntry<'a>>,
}

/// NextDNS denylist import JSON.
pub fn render_nextdns(domains: &[String]) -> Result<String, serde_json::Error> {
    let body = NextDnsDenylist {
        denylist: domains
            .iter()
            .map(|id| NextDnsEntry { id, active: true })
            .collect(),
    };
    serde_json::to_string_pretty(&body)
}
