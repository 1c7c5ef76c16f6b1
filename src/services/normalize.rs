//! URL canonicalization used as the identity key for submitted links.

use url::{form_urlencoded, Url};

/// Characters users (and chat clients) wrap links in.
const WRAPPING_CHARS: &[char] = &['<', '>', '"', '\'', '(', ')', '[', ']', '{', '}'];

/// Exact query keys stripped in addition to any `utm_*` key.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "ref", "source", "mc_cid", "mc_eid", "yclid", "dclid", "_ga",
    "_gl",
];

/// Upper bound on canonicalization passes; real inputs settle in one or two.
const MAX_PASSES: usize = 8;

/// Canonicalize a raw URL string.
///
/// Strips wrapping punctuation, tracking query parameters, the fragment and
/// default ports, and lower-cases scheme and host. Never fails: input that
/// does not parse is returned with only the wrapping removed, leaving the
/// rejection to the validator. Idempotent.
pub fn normalize(raw: &str) -> String {
    let mut current = normalize_once(raw);
    // Dropping a query or fragment can expose trailing wrapping characters.
    for _ in 0..MAX_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_once(raw: &str) -> String {
    let stripped = strip_wrapping(raw);

    let Ok(mut parsed) = Url::parse(stripped) else {
        return stripped.to_string();
    };

    parsed.set_fragment(None);

    if let Some(query) = parsed.query().and_then(strip_tracking) {
        parsed.set_query(query.as_deref());
    }

    // `Url` already lower-cases scheme and host for special schemes and
    // elides ports equal to the scheme default.
    parsed.to_string()
}

fn strip_wrapping(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c: char| WRAPPING_CHARS.contains(&c) || c.is_whitespace())
}

/// Drop `&`-separated segments whose decoded key is a tracking parameter.
///
/// Kept segments are rejoined byte for byte; the server must see the same
/// query it would have without tracking. `None` when nothing was dropped.
fn strip_tracking(query: &str) -> Option<Option<String>> {
    let segments: Vec<&str> = query.split('&').collect();
    let kept: Vec<&str> = segments
        .iter()
        .copied()
        .filter(|segment| !segment_key(segment).is_some_and(|key| is_tracking_param(&key)))
        .collect();

    if kept.len() == segments.len() {
        None
    } else if kept.is_empty() {
        Some(None)
    } else {
        Some(Some(kept.join("&")))
    }
}

fn segment_key(segment: &str) -> Option<String> {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}
