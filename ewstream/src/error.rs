//! Error types for the byte stream reader

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while opening or consuming a byte stream
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// HTTP request failed before or after headers
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The remote end reset the connection mid-stream
    ///
    /// Kept distinct from [`StreamError::Http`] so the owner can take the
    /// automatic reconnect path instead of failing hard.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// Proxy configuration could not be applied
    #[error("invalid proxy configuration: {0}")]
    Proxy(String),

    /// The reader was closed while the operation was in flight
    #[error("stream closed")]
    Closed,
}

impl StreamError {
    /// True when the failure is a transient connection reset the retry
    /// supervisor may recover from.
    pub fn is_connection_reset(&self) -> bool {
        matches!(self, StreamError::ConnectionReset)
    }
}

/// Classify a mid-body reqwest error, detecting resets buried in the
/// source chain as `ConnectionReset`.
pub(crate) fn classify_body_error(err: reqwest::Error) -> StreamError {
    if error_chain_is_reset(&err) {
        StreamError::ConnectionReset
    } else {
        StreamError::Http(err)
    }
}

fn error_chain_is_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        if e.to_string().to_ascii_lowercase().contains("connection reset") {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_io_error_is_detected_through_wrapping() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(error_chain_is_reset(&io));
    }

    #[test]
    fn plain_io_error_is_not_a_reset() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert!(!error_chain_is_reset(&io));
    }

    #[test]
    fn reset_variant_reports_retryable() {
        assert!(StreamError::ConnectionReset.is_connection_reset());
        assert!(!StreamError::Status(404).is_connection_reset());
    }
}
