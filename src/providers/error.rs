use std::fmt;

/// Classified provider error — tells the caller *why* the LLM call failed so
/// it can pick the right fallback wording.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 429 — rate limited.
    RateLimit,
    /// 404 or "model not found" — bad model name.
    NotFound,
    /// 408, request timeout, or provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504 — provider-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "provider error ({}, {:?}): {}", status, self.kind, self.message)
        } else {
            write!(f, "provider error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

fn truncate_body(body: &str) -> String {
    if body.len() > 300 {
        let mut end = 300;
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(ProviderError::from_status(401, "").kind, ProviderErrorKind::Auth);
        assert_eq!(ProviderError::from_status(429, "").kind, ProviderErrorKind::RateLimit);
        assert_eq!(ProviderError::from_status(503, "").kind, ProviderErrorKind::ServerError);
        assert_eq!(ProviderError::from_status(418, "").kind, ProviderErrorKind::Unknown);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let err = ProviderError::from_status(500, &"x".repeat(1000));
        assert!(err.message.len() < 320);
        assert!(err.message.ends_with("..."));
    }
}
