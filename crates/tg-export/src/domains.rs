//! Domain preparation for export
//!
//! Registry keys are normalized, checked as DNS hostnames, sorted and
//! deduplicated before any format renders them.

use std::collections::BTreeSet;

/// Lowercase, trim and validate export keys. Returns a sorted, deduplicated
/// list; anything that is not a plain DNS hostname is dropped.
pub fn prepare_domains<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for key in keys {
        let key = key.as_ref().trim().trim_end_matches('.').to_ascii_lowercase();
        if is_exportable_hostname(&key) {
            out.insert(key);
        } else if !key.is_empty() {
            log::warn!("skipping non-hostname export key {:?}", key);
        }
    }
    out.into_iter().collect()
}

/// At least two labels of `[a-z0-9-]`, no label starting or ending with `-`.
pub fn is_exportable_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 || !host.contains('.') {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    })
}
