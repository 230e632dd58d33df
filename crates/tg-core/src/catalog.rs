//! Signature Catalog
//!
//! Static classification data: per-family regex signatures for cookie names,
//! cookie values, request URLs, inline script content and page globals, plus
//! the set of known third-party tracking domains.
//!
//! The catalog is built once from a declarative `(family, kind, pattern)`
//! table and is immutable afterwards. Patterns that fail to compile (or blow
//! the compiled-size limit) are dropped at construction with a warning, so a
//! broken entry can never surface during matching.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

use crate::psl::walk_host_suffixes;

/// Compiled-program size cap per signature.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Family names, in script-matching priority order.
pub const GOOGLE_ANALYTICS: &str = "googleAnalytics";
pub const FACEBOOK: &str = "facebook";
pub const ADOBE: &str = "adobe";
pub const SESSION_RECORDING: &str = "sessionRecording";
pub const TIKTOK: &str = "tiktok";

// =============================================================================
// Signature Table
// =============================================================================

/// Which artifact a signature applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    CookieName,
    CookieValue,
    RequestUrl,
    ScriptContent,
    GlobalName,
}

use SignatureKind::*;

/// Built-in signatures. Family order is the attribution priority.
pub const SIGNATURE_TABLE: &[(&str, SignatureKind, &str)] = &[
    // --- Google Analytics / gtag / GTM ---
    (GOOGLE_ANALYTICS, CookieName, r"^_ga$"),
    (GOOGLE_ANALYTICS, CookieName, r"^_ga_[A-Z0-9]+$"),
    (GOOGLE_ANALYTICS, CookieName, r"^_gid$"),
    (GOOGLE_ANALYTICS, CookieName, r"^_gat(_.*)?$"),
    (GOOGLE_ANALYTICS, CookieName, r"^__utm[abcvzt]$"),
    (GOOGLE_ANALYTICS, CookieName, r"^_gcl_(au|aw|dc|gb)$"),
    (GOOGLE_ANALYTICS, CookieName, r"^_dc_gtm_"),
    (GOOGLE_ANALYTICS, CookieName, r"^AMP_TOKEN$"),
    (GOOGLE_ANALYTICS, CookieValue, r"^GA\d\.\d\.\d+\.\d+$"),
    (GOOGLE_ANALYTICS, CookieValue, r"^GS\d\.\d\."),
    (GOOGLE_ANALYTICS, CookieValue, r"^1\.1\.\d+\.\d+$"),
    (GOOGLE_ANALYTICS, RequestUrl, r"(?i)google-analytics\.com/(g/|mp/)?collect"),
    (GOOGLE_ANALYTICS, RequestUrl, r"(?i)googletagmanager\.com/(gtag/js|gtm\.js)"),
    (GOOGLE_ANALYTICS, RequestUrl, r"(?i)analytics\.google\.com/g/collect"),
    (GOOGLE_ANALYTICS, RequestUrl, r"(?i)stats\.g\.doubleclick\.net/"),
    (GOOGLE_ANALYTICS, RequestUrl, r"(?i)/(g|mp)/collect\?"),
    (GOOGLE_ANALYTICS, RequestUrl, r"(?i)/gtag/js\?id="),
    (GOOGLE_ANALYTICS, ScriptContent, r#"gtag\s*\(\s*['"](config|event|js|set)['"]"#),
    (GOOGLE_ANALYTICS, ScriptContent, r#"\bga\s*\(\s*['"](create|send|set)['"]"#),
    (GOOGLE_ANALYTICS, ScriptContent, r"GoogleAnalyticsObject"),
    (GOOGLE_ANALYTICS, ScriptContent, r"googletagmanager\.com/gtag/js"),
    (GOOGLE_ANALYTICS, ScriptContent, r"_gaq\.push"),
    (GOOGLE_ANALYTICS, GlobalName, r"^(gtag|ga|_gaq|google_tag_manager|google_tag_data|GoogleAnalyticsObject)$"),
    // --- Facebook / Meta Pixel ---
    (FACEBOOK, CookieName, r"^_fbp$"),
    (FACEBOOK, CookieName, r"^_fbc$"),
    (FACEBOOK, CookieName, r"^fr$"),
    (FACEBOOK, CookieValue, r"^fb\.\d\.\d+\.\d+"),
    (FACEBOOK, RequestUrl, r"(?i)facebook\.(com|net)/tr\b"),
    (FACEBOOK, RequestUrl, r"(?i)connect\.facebook\.net/[^/]+/fbevents\.js"),
    (FACEBOOK, RequestUrl, r"(?i)/tr/?\?id=\d+&ev="),
    (FACEBOOK, ScriptContent, r#"fbq\s*\(\s*['"](init|track|trackCustom)['"]"#),
    (FACEBOOK, ScriptContent, r"connect\.facebook\.net/[A-Za-z_]+/fbevents\.js"),
    (FACEBOOK, ScriptContent, r"\b_fbq\b"),
    (FACEBOOK, GlobalName, r"^(fbq|_fbq)$"),
    // --- Adobe Analytics / Experience Cloud ---
    (ADOBE, CookieName, r"^s_(cc|sq|vi|fid|ecid|ppv|nr)$"),
    (ADOBE, CookieName, r"^AMCVS?_"),
    (ADOBE, CookieName, r"^mbox$"),
    (ADOBE, CookieName, r"^(demdex|dextp)$"),
    (ADOBE, CookieValue, r"^\[CS\]v1\|"),
    (ADOBE, CookieValue, r"MCMID\|"),
    (ADOBE, RequestUrl, r"(?i)\.omtrdc\.net/"),
    (ADOBE, RequestUrl, r"(?i)\.2o7\.net/"),
    (ADOBE, RequestUrl, r"(?i)\.demdex\.net/"),
    (ADOBE, RequestUrl, r"(?i)/b/ss/[^/]+/\d+"),
    (ADOBE, RequestUrl, r"(?i)assets\.adobedtm\.com/"),
    (ADOBE, ScriptContent, r"\bs_gi\s*\("),
    (ADOBE, ScriptContent, r"AppMeasurement"),
    (ADOBE, ScriptContent, r"_satellite\.(track|pageBottom)"),
    (ADOBE, ScriptContent, r#"\balloy\s*\(\s*['"]"#),
    (ADOBE, GlobalName, r"^(s_gi|s_account|_satellite|AppMeasurement|alloy)$"),
    // --- Session recording (Hotjar, Clarity, FullStory, Mouseflow, LogRocket, Smartlook) ---
    (SESSION_RECORDING, CookieName, r"^_hj[A-Za-z_]+"),
    (SESSION_RECORDING, CookieName, r"^_cl(ck|sk)$"),
    (SESSION_RECORDING, CookieName, r"^CLID$"),
    (SESSION_RECORDING, CookieName, r"^fs_(uid|lua)$"),
    (SESSION_RECORDING, CookieName, r"^mf_"),
    (SESSION_RECORDING, CookieName, r"^_lr_"),
    (SESSION_RECORDING, RequestUrl, r"(?i)(static|script|vars|in|vc)\.hotjar\.(com|io)"),
    (SESSION_RECORDING, RequestUrl, r"(?i)clarity\.ms/(tag|collect)"),
    (SESSION_RECORDING, RequestUrl, r"(?i)fullstory\.com/(s/fs\.js|rec/)"),
    (SESSION_RECORDING, RequestUrl, r"(?i)mouseflow\.com/"),
    (SESSION_RECORDING, RequestUrl, r"(?i)logrocket\.(io|com)/"),
    (SESSION_RECORDING, RequestUrl, r"(?i)smartlook\.(com|cloud)/"),
    (SESSION_RECORDING, ScriptContent, r#"\bhj\s*\(\s*['"]"#),
    (SESSION_RECORDING, ScriptContent, r"_hjSettings"),
    (SESSION_RECORDING, ScriptContent, r#"\bclarity\s*\(\s*['"]"#),
    (SESSION_RECORDING, ScriptContent, r"_fs_org"),
    (SESSION_RECORDING, ScriptContent, r"\b_mfq\b"),
    (SESSION_RECORDING, ScriptContent, r"LogRocket\.init"),
    (SESSION_RECORDING, ScriptContent, r"\bsmartlook\s*\("),
    (SESSION_RECORDING, GlobalName, r"^(hj|_hjSettings|clarity|FS|_fs_namespace|mouseflow|_mfq|LogRocket|smartlook)$"),
    // --- TikTok Pixel ---
    (TIKTOK, CookieName, r"^_ttp$"),
    (TIKTOK, CookieName, r"^ttcsid"),
    (TIKTOK, CookieName, r"^_tt_enable_cookie$"),
    (TIKTOK, RequestUrl, r"(?i)analytics\.tiktok\.com/"),
    (TIKTOK, RequestUrl, r"(?i)/api/v2/pixel"),
    (TIKTOK, ScriptContent, r"\bttq\.(load|page|track|identify)\s*\("),
    (TIKTOK, ScriptContent, r"analytics\.tiktok\.com/i18n/pixel"),
    (TIKTOK, ScriptContent, r"TiktokAnalyticsObject"),
    (TIKTOK, GlobalName, r"^(ttq|TiktokAnalyticsObject)$"),
];

/// Known third-party tracking domains. Subdomains match too.
pub const KNOWN_TRACKING_DOMAINS: &[&str] = &[
    // Google
    "google-analytics.com",
    "analytics.google.com",
    "googletagmanager.com",
    "googletagservices.com",
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    // Meta
    "connect.facebook.net",
    "pixel.facebook.com",
    "an.facebook.com",
    // Adobe
    "omtrdc.net",
    "2o7.net",
    "demdex.net",
    "everesttech.net",
    "adobedtm.com",
    // Session recording
    "hotjar.com",
    "hotjar.io",
    "clarity.ms",
    "fullstory.com",
    "mouseflow.com",
    "logrocket.io",
    "lr-ingest.io",
    "smartlook.com",
    "smartlook.cloud",
    "crazyegg.com",
    "luckyorange.com",
    // TikTok
    "analytics.tiktok.com",
    "analytics-sg.tiktok.com",
    // Product analytics
    "mixpanel.com",
    "segment.io",
    "segment.com",
    "amplitude.com",
    "heapanalytics.com",
    "heap.io",
    "chartbeat.com",
    "scorecardresearch.com",
    "quantserve.com",
    "newrelic.com",
    "nr-data.net",
    // Ad tech pixels
    "bat.bing.com",
    "ads-twitter.com",
    "analytics.twitter.com",
    "snap.licdn.com",
    "px.ads.linkedin.com",
    "ct.pinterest.com",
    "tr.snapchat.com",
    "criteo.com",
    "criteo.net",
    "adsrvr.org",
    "adnxs.com",
    "taboola.com",
    "outbrain.com",
    "amazon-adsystem.com",
    "moatads.com",
    "mc.yandex.ru",
];

// =============================================================================
// Known Tracking Domains
// =============================================================================

/// Immutable set of known third-party tracking domains.
///
/// A hostname is known when it equals a listed domain or ends with
/// `"." + domain`. Lookup walks the hostname and each parent suffix.
#[derive(Debug, Default)]
pub struct KnownTrackingDomains {
    domains: HashSet<String>,
}

impl KnownTrackingDomains {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    pub fn builtin() -> Self {
        Self::new(KNOWN_TRACKING_DOMAINS)
    }

    /// The listed domain a hostname falls under, if any.
    pub fn matching_domain(&self, hostname: &str) -> Option<&str> {
        let lowered;
        let hostname = if hostname.bytes().any(|b| b.is_ascii_uppercase()) {
            lowered = hostname.to_ascii_lowercase();
            lowered.as_str()
        } else {
            hostname
        };
        walk_host_suffixes(hostname)
            .find_map(|suffix| self.domains.get(suffix).map(String::as_str))
    }

    #[inline]
    pub fn contains(&self, hostname: &str) -> bool {
        self.matching_domain(hostname).is_some()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(String::as_str)
    }
}

// =============================================================================
// Tracker Signature Sets
// =============================================================================

/// Compiled signatures for one tracker family.
#[derive(Debug)]
pub struct TrackerSignatureSet {
    pub family: String,
    pub cookie_names: Vec<Regex>,
    pub cookie_values: Vec<Regex>,
    pub request_urls: Vec<Regex>,
    pub script_content: Vec<Regex>,
    pub global_names: Vec<Regex>,
}

impl TrackerSignatureSet {
    fn new(family: &str) -> Self {
        Self {
            family: family.to_string(),
            cookie_names: Vec::new(),
            cookie_values: Vec::new(),
            request_urls: Vec::new(),
            script_content: Vec::new(),
            global_names: Vec::new(),
        }
    }

    /// Patterns of one kind, in table order.
    pub fn patterns(&self, kind: SignatureKind) -> &[Regex] {
        match kind {
            CookieName => &self.cookie_names,
            CookieValue => &self.cookie_values,
            RequestUrl => &self.request_urls,
            ScriptContent => &self.script_content,
            GlobalName => &self.global_names,
        }
    }

    fn patterns_mut(&mut self, kind: SignatureKind) -> &mut Vec<Regex> {
        match kind {
            CookieName => &mut self.cookie_names,
            CookieValue => &mut self.cookie_values,
            RequestUrl => &mut self.request_urls,
            ScriptContent => &mut self.script_content,
            GlobalName => &mut self.global_names,
        }
    }
}

/// A table entry that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPattern {
    pub family: String,
    pub kind: SignatureKind,
    pub pattern: String,
    pub reason: String,
}

// =============================================================================
// Signature Catalog
// =============================================================================

/// Read-only lookup table handed to the classifier.
#[derive(Debug)]
pub struct SignatureCatalog {
    families: Vec<TrackerSignatureSet>,
    known_domains: KnownTrackingDomains,
    rejected: Vec<RejectedPattern>,
}

impl SignatureCatalog {
    /// Build the catalog from the built-in tables.
    pub fn builtin() -> Self {
        Self::from_table(SIGNATURE_TABLE, KnownTrackingDomains::builtin())
    }

    /// Build a catalog from `(family, kind, pattern)` triples.
    /// Families keep the order of their first appearance in `table`.
    pub fn from_table(table: &[(&str, SignatureKind, &str)], known_domains: KnownTrackingDomains) -> Self {
        let mut families: Vec<TrackerSignatureSet> = Vec::new();
        let mut rejected = Vec::new();

        for &(family, kind, pattern) in table {
            let compiled = RegexBuilder::new(pattern).size_limit(PATTERN_SIZE_LIMIT).build();

            let regex = match compiled {
                Ok(regex) => regex,
                Err(e) => {
                    log::warn!("dropping {:?} signature for {}: {}", kind, family, e);
                    rejected.push(RejectedPattern {
                        family: family.to_string(),
                        kind,
                        pattern: pattern.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let idx = match families.iter().position(|set| set.family == family) {
                Some(idx) => idx,
                None => {
                    families.push(TrackerSignatureSet::new(family));
                    families.len() - 1
                }
            };
            families[idx].patterns_mut(kind).push(regex);
        }

        Self {
            families,
            known_domains,
            rejected,
        }
    }

    pub fn families(&self) -> &[TrackerSignatureSet] {
        &self.families
    }

    pub fn known_domains(&self) -> &KnownTrackingDomains {
        &self.known_domains
    }

    /// Patterns dropped at construction.
    pub fn rejected(&self) -> &[RejectedPattern] {
        &self.rejected
    }

    /// Ordered `(family, pattern)` pairs for one artifact kind.
    pub fn patterns(&self, kind: SignatureKind) -> impl Iterator<Item = (&str, &Regex)> {
        self.families
            .iter()
            .flat_map(move |set| set.patterns(kind).iter().map(move |re| (set.family.as_str(), re)))
    }
}

impl Default for SignatureCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
