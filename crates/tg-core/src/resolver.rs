//! Blocking-Target Resolver
//!
//! Turns a classified detection into a [`BlockingDecision`]. The policy is
//! ordered and the order is the point:
//!
//! 1. The authoritative domain is the request URL's host for `request`
//!    detections with a parseable URL, otherwise the domain hint.
//! 2. A known third-party tracker is blocked and registered for export.
//! 3. A request whose path looks like self-hosted analytics is blocked
//!    in-browser only, when `block_self_hosted` is on.
//! 4. Low sensitivity allows everything else.
//! 5. Anything else is blocked in-browser only.
//!
//! Only step 2 ever sets `register_for_export`, so self-hosted and ambiguous
//! detections never reach an exported blocklist.

use crate::classifier::Classifier;
use crate::error::EngineError;
use crate::settings::{Sensitivity, Settings};
use crate::types::{BlockingDecision, DetectionMethod};
use crate::url::{extract_path_and_query, normalize_host, parse_request_host};

/// Paths served by first-party analytics proxies and self-hosted tag managers.
pub const SELF_HOSTED_SIGNATURES: &[&str] = &[
    "/gtag/js",
    "/gtm.js",
    "/analytics.js",
    "/ga.js",
    "/collect?",
    "/g/collect?",
    "/mp/collect?",
];

/// True when the URL path (with query) carries one of the self-hosted signatures.
pub fn is_self_hosted_path(url: &str) -> bool {
    let path = extract_path_and_query(url);
    SELF_HOSTED_SIGNATURES.iter().any(|sig| path.contains(sig))
}

/// Decides the disposition of classified detections.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    classifier: Classifier<'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(classifier: Classifier<'a>) -> Self {
        Self { classifier }
    }

    /// Resolve one detection.
    ///
    /// Fails only when there is no domain to attribute the detection to at
    /// all (empty hint and no parseable request URL).
    pub fn resolve(
        &self,
        domain_hint: &str,
        method: DetectionMethod,
        raw_detail: &str,
        settings: &Settings,
    ) -> Result<BlockingDecision, EngineError> {
        let request_host = match method {
            DetectionMethod::Request => parse_request_host(raw_detail),
            _ => None,
        };

        let target = normalize_host(request_host.unwrap_or(domain_hint));
        if target.is_empty() {
            return Err(EngineError::MissingTarget { method: method.as_str() });
        }

        if self.classifier.is_known_tracking_hostname(&target) {
            return Ok(BlockingDecision::network_level(target));
        }

        if method == DetectionMethod::Request
            && request_host.is_some()
            && settings.block_self_hosted
            && is_self_hosted_path(raw_detail)
        {
            return Ok(BlockingDecision::browser_only(target));
        }

        if settings.detection_sensitivity == Sensitivity::Low {
            return Ok(BlockingDecision::allow(target));
        }

        Ok(BlockingDecision::browser_only(target))
    }
}
