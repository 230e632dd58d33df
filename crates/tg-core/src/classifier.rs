//! Classifier
//!
//! Pure functions over the [`SignatureCatalog`]: given an observed artifact,
//! say which tracker family it belongs to. No state is kept between calls.
//!
//! Every input is capped before matching. Text longer than
//! [`MAX_SCAN_BYTES`] is replaced by a head + tail sample so a bundled or
//! adversarial script costs at most a fixed amount to scan. Empty input is a
//! neutral "no match", never an error.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

use crate::catalog::{SignatureCatalog, SignatureKind};

/// Inputs above this size are sampled instead of scanned in full.
pub const MAX_SCAN_BYTES: usize = 10 * 1024;
/// Bytes kept from each end of an oversized input.
pub const SAMPLE_BYTES: usize = 5 * 1024;

/// Attribution used when a script posts to a collect endpoint we cannot resolve to a URL.
pub const SELF_HOSTED_MEASUREMENT: &str = "self-hosted measurement protocol";

fn gtm_container_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"GTM-[A-Z0-9]{4,8}").ok()).as_ref()
}

fn measurement_url_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>`)\\]*collect[^\s"'<>`)\\]*"#).ok())
        .as_ref()
}

// =============================================================================
// Verdicts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UrlVerdict<'a> {
    pub is_tracking_request: bool,
    pub matched_family: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CookieVerdict<'a> {
    pub is_tracking_cookie: bool,
    pub matched_family: Option<&'a str>,
    /// The value also matched one of the family's value patterns.
    /// Informational only; the name decides.
    pub value_matched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptVerdict<'a> {
    pub matched_family: Option<&'a str>,
    pub gtm_container_id: Option<String>,
    pub measurement_url: Option<String>,
}

impl ScriptVerdict<'_> {
    pub fn is_match(&self) -> bool {
        self.matched_family.is_some() || self.gtm_container_id.is_some() || self.measurement_url.is_some()
    }
}

// =============================================================================
// Sampling
// =============================================================================

/// Largest char boundary `<= index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary `>= index`.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Cap `text` to a head + tail sample when it exceeds [`MAX_SCAN_BYTES`].
pub fn bounded_sample(text: &str) -> Cow<'_, str> {
    if text.len() <= MAX_SCAN_BYTES {
        return Cow::Borrowed(text);
    }
    let head_end = floor_char_boundary(text, SAMPLE_BYTES);
    let tail_start = ceil_char_boundary(text, text.len() - SAMPLE_BYTES);

    let mut sample = String::with_capacity(head_end + 1 + text.len() - tail_start);
    sample.push_str(&text[..head_end]);
    sample.push('\n');
    sample.push_str(&text[tail_start..]);
    Cow::Owned(sample)
}

// =============================================================================
// Classifier
// =============================================================================

/// Stateless classifier over a catalog.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    catalog: &'a SignatureCatalog,
}

impl<'a> Classifier<'a> {
    pub fn new(catalog: &'a SignatureCatalog) -> Self {
        Self { catalog }
    }

    /// First family whose `kind` patterns match `text`.
    fn first_family(&self, kind: SignatureKind, text: &str) -> Option<&'a str> {
        self.catalog
            .patterns(kind)
            .find(|(_, re)| re.is_match(text))
            .map(|(family, _)| family)
    }

    /// Exact-or-suffix membership in the known tracking domains.
    /// This is the fast path, checked before any pattern matching.
    #[inline]
    pub fn is_known_tracking_hostname(&self, hostname: &str) -> bool {
        !hostname.is_empty() && self.catalog.known_domains().contains(hostname)
    }

    pub fn classify_url(&self, url: &str) -> UrlVerdict<'a> {
        if url.is_empty() {
            return UrlVerdict::default();
        }
        let sample = bounded_sample(url);
        match self.first_family(SignatureKind::RequestUrl, &sample) {
            Some(family) => UrlVerdict {
                is_tracking_request: true,
                matched_family: Some(family),
            },
            None => UrlVerdict::default(),
        }
    }

    pub fn classify_cookie(&self, name: &str, value: &str) -> CookieVerdict<'a> {
        if name.is_empty() {
            return CookieVerdict::default();
        }
        let name = bounded_sample(name);
        let family = match self.first_family(SignatureKind::CookieName, &name) {
            Some(family) => family,
            None => return CookieVerdict::default(),
        };

        let value = bounded_sample(value);
        let value_matched = !value.is_empty()
            && self
                .catalog
                .families()
                .iter()
                .filter(|set| set.family == family)
                .flat_map(|set| set.cookie_values.iter())
                .any(|re| re.is_match(&value));

        CookieVerdict {
            is_tracking_cookie: true,
            matched_family: Some(family),
            value_matched,
        }
    }

    pub fn classify_script_content(&self, text: &str) -> ScriptVerdict<'a> {
        if text.is_empty() {
            return ScriptVerdict::default();
        }
        let sample = bounded_sample(text);

        let matched_family = self.first_family(SignatureKind::ScriptContent, &sample);
        let gtm_container_id = gtm_container_re().and_then(|re| re.find(&sample)).map(|m| m.as_str().to_string());

        let measurement_url = if sample.contains("/collect") || sample.contains("/mp/collect") {
            let url = measurement_url_re()
                .and_then(|re| re.find(&sample))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| SELF_HOSTED_MEASUREMENT.to_string());
            Some(url)
        } else {
            None
        };

        ScriptVerdict {
            matched_family,
            gtm_container_id,
            measurement_url,
        }
    }

    /// Family of a page global such as `fbq` or `_hjSettings`.
    pub fn classify_global(&self, name: &str) -> Option<&'a str> {
        if name.is_empty() || name.len() > 256 {
            return None;
        }
        self.first_family(SignatureKind::GlobalName, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ADOBE, FACEBOOK, GOOGLE_ANALYTICS, SESSION_RECORDING, TIKTOK};

    fn catalog() -> SignatureCatalog {
        SignatureCatalog::builtin()
    }

    #[test]
    fn test_classify_url_matches_family() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        let v = c.classify_url("https://www.google-analytics.com/collect?x=1");
        assert!(v.is_tracking_request);
        assert_eq!(v.matched_family, Some(GOOGLE_ANALYTICS));

        let v = c.classify_url("https://connect.facebook.net/en_US/fbevents.js");
        assert_eq!(v.matched_family, Some(FACEBOOK));

        let v = c.classify_url("https://metrics.shop.example/b/ss/shopprod/1/JS-2.22.0");
        assert_eq!(v.matched_family, Some(ADOBE));
    }

    #[test]
    fn test_classify_url_neutral() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        assert_eq!(c.classify_url(""), UrlVerdict::default());
        assert!(!c.classify_url("https://news.example/article/42").is_tracking_request);
        assert!(!c.classify_url("::::not a url::::").is_tracking_request);
    }

    #[test]
    fn test_known_hostname_fast_path() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        assert!(c.is_known_tracking_hostname("www.google-analytics.com"));
        assert!(c.is_known_tracking_hostname("script.hotjar.com"));
        assert!(!c.is_known_tracking_hostname("news.example"));
        assert!(!c.is_known_tracking_hostname(""));
    }

    #[test]
    fn test_classify_cookie_name_is_authoritative() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);

        let v = c.classify_cookie("_ga", "GA1.2.123.456");
        assert!(v.is_tracking_cookie);
        assert_eq!(v.matched_family, Some(GOOGLE_ANALYTICS));
        assert!(v.value_matched);

        // Value does not have to match.
        let v = c.classify_cookie("_ga", "whatever");
        assert!(v.is_tracking_cookie);
        assert!(!v.value_matched);

        // A tracker-looking value alone is not enough.
        let v = c.classify_cookie("session", "GA1.2.123.456");
        assert!(!v.is_tracking_cookie);
        assert_eq!(v.matched_family, None);
    }

    #[test]
    fn test_classify_cookie_families() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        assert_eq!(c.classify_cookie("_fbp", "fb.1.1596403881668.1116446470").matched_family, Some(FACEBOOK));
        assert_eq!(c.classify_cookie("AMCV_ABC%40AdobeOrg", "").matched_family, Some(ADOBE));
        assert_eq!(c.classify_cookie("_hjSessionUser_123", "x").matched_family, Some(SESSION_RECORDING));
        assert_eq!(c.classify_cookie("_ttp", "x").matched_family, Some(TIKTOK));
        assert!(!c.classify_cookie("", "GA1.2.3.4").is_tracking_cookie);
    }

    #[test]
    fn test_classify_cookie_is_idempotent() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        let first = c.classify_cookie("_gid", "GA1.2.99.1");
        let second = c.classify_cookie("_gid", "GA1.2.99.1");
        assert_eq!(first, second);
    }

    #[test]
    fn test_classify_script_family_priority() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);

        let v = c.classify_script_content("gtag('config','G-XXXX')");
        assert_eq!(v.matched_family, Some(GOOGLE_ANALYTICS));
        assert_eq!(v.gtm_container_id, None);
        assert_eq!(v.measurement_url, None);

        // Both GA and Facebook present: GA wins.
        let v = c.classify_script_content("fbq('init','1'); gtag('event','x');");
        assert_eq!(v.matched_family, Some(GOOGLE_ANALYTICS));

        let v = c.classify_script_content("ttq.load('C123'); ttq.page();");
        assert_eq!(v.matched_family, Some(TIKTOK));
    }

    #[test]
    fn test_classify_script_gtm_and_measurement() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);

        let v = c.classify_script_content("(function(w,d,s,l,i){})(window,document,'script','dataLayer','GTM-AB12CD');");
        assert_eq!(v.gtm_container_id.as_deref(), Some("GTM-AB12CD"));

        let v = c.classify_script_content("navigator.sendBeacon('https://metrics.news.example/mp/collect?api_secret=x', body)");
        assert_eq!(v.measurement_url.as_deref(), Some("https://metrics.news.example/mp/collect?api_secret=x"));

        let v = c.classify_script_content("fetch('/g/collect?v=2&tid=G-1')");
        assert_eq!(v.measurement_url.as_deref(), Some(SELF_HOSTED_MEASUREMENT));
        assert!(v.is_match());
    }

    #[test]
    fn test_classify_script_empty_is_neutral() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        let v = c.classify_script_content("");
        assert!(!v.is_match());
        assert!(!c.classify_script_content("console.log('hello')").is_match());
    }

    #[test]
    fn test_bounded_sample_caps_size() {
        let small = "a".repeat(MAX_SCAN_BYTES);
        assert!(matches!(bounded_sample(&small), Cow::Borrowed(_)));

        let big = format!("{}{}{}", "gtag('config','G-1');", "x".repeat(200_000), "ttq.load('C')");
        let sample = bounded_sample(&big);
        assert!(sample.len() <= 2 * SAMPLE_BYTES + 1);
        assert!(sample.starts_with("gtag("));
        assert!(sample.ends_with("ttq.load('C')"));
    }

    #[test]
    fn test_bounded_sample_respects_char_boundaries() {
        let big = "é".repeat(MAX_SCAN_BYTES);
        let sample = bounded_sample(&big);
        assert!(sample.chars().all(|ch| ch == 'é' || ch == '\n'));
    }

    #[test]
    fn test_pathological_script_is_bounded() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        let adversarial = "((((((((((gtag(".repeat(500_000);
        let started = std::time::Instant::now();
        let v = c.classify_script_content(&adversarial);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(v.gtm_container_id, None);
    }

    #[test]
    fn test_classify_global() {
        let catalog = catalog();
        let c = Classifier::new(&catalog);
        assert_eq!(c.classify_global("fbq"), Some(FACEBOOK));
        assert_eq!(c.classify_global("_hjSettings"), Some(SESSION_RECORDING));
        assert_eq!(c.classify_global("jQuery"), None);
        assert_eq!(c.classify_global(""), None);
    }
}
