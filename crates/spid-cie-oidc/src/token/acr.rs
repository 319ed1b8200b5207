//! Authentication context (LoA) comparison.
//!
//! Both short names (`SpidL2`, `LoA2`) and URIs
//! (`https://www.spid.gov.it/SpidL2`) map to a numeric level 1-3.

use std::sync::LazyLock;

use regex::Regex;

static LOA_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:spidl?|loa)\s*([1-3])$").expect("LOA_SUFFIX regex is valid")
});

static SPID_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/SpidL([1-3])$").expect("SPID_URI regex is valid"));

/// Numeric level (1-3) of an ACR value, if recognizable.
#[must_use]
pub fn extract_loa_level(acr: &str) -> Option<u8> {
    LOA_SUFFIX
        .captures(acr)
        .or_else(|| SPID_URI.captures(acr))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Returns `true` if `actual` meets `minimum`.
///
/// Levels are compared numerically when both sides are recognizable;
/// otherwise the values must match case-insensitively.
#[must_use]
pub fn is_acr_at_least(actual: &str, minimum: &str) -> bool {
    match (extract_loa_level(actual), extract_loa_level(minimum)) {
        (Some(actual), Some(minimum)) => actual >= minimum,
        _ => actual.to_lowercase() == minimum.to_lowercase(),
    }
}
