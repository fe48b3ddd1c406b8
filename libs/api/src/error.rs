/// Category of a cache store error. Lets callers decide whether to
/// skip the record, abort the request, or fail at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration, e.g. a bad URL or a zero pool size.
    Config,
    /// I/O or network error talking to the store.
    Io,
    /// The store returned data that could not be decoded.
    Format,
    /// Logical error (generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for all `CacheStore` methods.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
#[derive(Clone)]
pub struct StoreError {
    kind: ErrorKind,
    message: String,
}

impl StoreError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    /// Configuration error. Permanent.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    /// I/O error: the store round-trip failed.
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    /// Format error: a stored value could not be decoded.
    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<std::num::ParseIntError> for StoreError {
    fn from(e: std::num::ParseIntError) -> Self { Self { kind: ErrorKind::Format, message: e.to_string() } }
}

/// Client-supplied replay position rejected by [`crate::parse_offset`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OffsetError {
    #[error("malformed offset '{0}'")]
    Malformed(String),

    #[error("offset should be greater than zero, got {0}")]
    Negative(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_keeps_kind_and_message() {
        let err = StoreError::io("ZADD stream-company-profile: connection reset");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "ZADD stream-company-profile: connection reset");
        assert_eq!(format!("{err:?}"), "[io] ZADD stream-company-profile: connection reset");
    }

    #[test]
    fn unparsable_ttl_member_is_a_format_error() {
        let err: StoreError = "12x".parse::<i64>().unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
