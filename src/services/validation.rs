use url::Url;

/// Reject anything that is not an absolute http(s) URL with a host.
///
/// Returns the trimmed input unchanged on success; canonicalization is the
/// normalizer's job.
pub fn validate(raw: &str) -> Result<String, ValidationError> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return Err(ValidationError::new(raw, "empty URL"));
    }

    let parsed = Url::parse(candidate).map_err(|e| ValidationError::new(raw, e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::new(
                raw,
                format!("unsupported scheme '{other}'"),
            ))
        }
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(ValidationError::new(raw, "missing host")),
    }

    Ok(candidate.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid URL '{url}': {reason}")]
pub struct ValidationError {
    pub url: String,
    pub reason: String,
}

impl ValidationError {
    fn new(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
