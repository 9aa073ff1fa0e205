//! Error taxonomy of the inventory API client.

/// HTTP statuses that are retried with backoff.
pub const TRANSIENT_STATUSES: &[u16] = &[429, 503];

/// Errors from the inventory API layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Missing or invalid credentials. Never retried.
    #[error("Inventory API is not configured: {0}")]
    Configuration(String),

    /// Rate limiting, unavailability, timeouts and connection failures.
    #[error("Transient inventory API failure: {0}")]
    Transient(String),

    /// Any other non-2xx response.
    #[error("Inventory API error ({status}): {body}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The HTTP request itself failed in a non-transient way.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body was not JSON.
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the retry loop should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the run must stop immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Classify a non-2xx response.
    pub fn from_status(status: u16, body: String) -> Self {
        if TRANSIENT_STATUSES.contains(&status) {
            Self::Transient(format!("HTTP {status}: {body}"))
        } else {
            Self::Upstream { status, body }
        }
    }

    /// Classify a transport error, including failures while reading the
    /// response body.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_body() {
            Self::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Request(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn rate_limit_and_unavailable_are_transient() {
        assert!(ClientError::from_status(429, String::new()).is_transient());
        assert!(ClientError::from_status(503, String::new()).is_transient());
    }

    #[test]
    fn other_statuses_are_upstream_errors() {
        assert_matches!(
            ClientError::from_status(500, "boom".into()),
            ClientError::Upstream { status: 500, .. }
        );
        assert!(!ClientError::from_status(404, String::new()).is_transient());
    }

    #[test]
    fn configuration_is_fatal_and_not_transient() {
        let err = ClientError::Configuration("no key".into());
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }
}
