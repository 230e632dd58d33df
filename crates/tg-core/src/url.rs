//! Fast URL helpers for the request path
//!
//! These functions avoid allocations and work directly on string slices.
//! Anything that does not look like an absolute web URL yields `None` (or an
//! empty path) instead of an error, so malformed input classifies as "no match".

// =============================================================================
// Scheme
// =============================================================================

/// Schemes whose URLs name a network host we can classify.
const WEB_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    None
}

/// True when the URL starts with one of the web schemes.
#[inline]
pub fn has_web_scheme(url: &str) -> bool {
    match url.find("://") {
        Some(pos) => WEB_SCHEMES.iter().any(|s| url[..pos].eq_ignore_ascii_case(s)),
        None => false,
    }
}

// =============================================================================
// Host
// =============================================================================

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(host_start) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Fast host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Host of an absolute web URL, or `None` when the URL is not parseable as one.
pub fn parse_request_host(url: &str) -> Option<&str> {
    if !has_web_scheme(url) {
        return None;
    }
    let host = extract_host(url)?;
    if host.is_empty() || host.bytes().any(|b| b.is_ascii_whitespace()) {
        return None;
    }
    Some(host)
}

/// Normalize a hostname into a registry key: lowercase, no root dot,
/// no leading cookie dot, no leading `www.`.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_start_matches('.');
    let host = host.strip_suffix('.').unwrap_or(host);
    let lower = host.to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => lower,
    }
}

// =============================================================================
// Path
// =============================================================================

/// Path plus query string, fragment removed. Returns "/" when there is no path.
#[inline]
pub fn extract_path_and_query(url: &str) -> &str {
    let (_, host_end) = match get_host_position(url) {
        Some(pos) => pos,
        None => return "/",
    };

    let bytes = url.as_bytes();
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate().skip(host_end) {
        if b == b'/' || b == b'?' {
            start = Some(i);
            break;
        }
        if b == b'#' {
            return "/";
        }
    }

    let start = match start {
        Some(pos) => pos,
        None => return "/",
    };

    let end = url[start..].find('#').map_or(url.len(), |pos| start + pos);
    &url[start..end]
}
