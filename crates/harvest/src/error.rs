//! Error taxonomy for schema resolution and crawling.

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The schema or the engine configuration is unusable.
    Configuration,
    /// The document provider failed.
    Fetch,
    /// A function leaf or custom type handler reported a failure.
    Extraction,
    /// Local I/O (file sink).
    Io,
}

/// All errors that can occur while resolving a schema.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Invalid schema at {path}: unsupported {found} value")]
    InvalidSchema { path: String, found: String },

    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A filter or selector error found by strict validation, with the key
    /// path of the offending node.
    #[error("Invalid schema at {path}: {error}")]
    InvalidAt { path: String, error: Box<Error> },

    #[error("Link source `{0}` can only be crawled nested inside another document")]
    DetachedLink(String),

    #[error("Fetch failed for {url}")]
    Fetch {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownFilter(_)
            | Error::InvalidSchema { .. }
            | Error::InvalidSelector { .. }
            | Error::InvalidPattern { .. }
            | Error::InvalidAt { .. }
            | Error::DetachedLink(_) => ErrorKind::Configuration,
            Error::Fetch { .. } => ErrorKind::Fetch,
            Error::Extraction(_) | Error::Json(_) => ErrorKind::Extraction,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for a failure signalled by a function leaf or custom handler.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Error::Extraction(msg.into())
    }

    /// Wrap a document provider failure without altering it.
    pub fn fetch(url: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Fetch {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Key path of the schema node a validation error points at.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::InvalidSchema { path, .. } | Error::InvalidAt { path, .. } => Some(path.as_str()),
            _ => None,
        }
    }

    pub(crate) fn at(self, path: &str) -> Self {
        Error::InvalidAt {
            path: path.to_string(),
            error: Box::new(self),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            Error::UnknownFilter("nope".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(Error::extraction("boom").kind(), ErrorKind::Extraction);
        let fetch = Error::Fetch {
            url: "https://example.com".into(),
            source: anyhow::anyhow!("connection refused").into(),
        };
        assert_eq!(fetch.kind(), ErrorKind::Fetch);
        assert!(std::error::Error::source(&fetch).is_some());
    }

    #[test]
    fn test_invalid_schema_message_names_path() {
        let err = Error::InvalidSchema {
            path: "$.items[].price".into(),
            found: "number".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("$.items[].price"));
        assert!(msg.contains("number"));
    }

    #[test]
    fn test_at_keeps_inner_error_and_path() {
        let err = Error::UnknownFilter("shout".into()).at("$.items[].name");
        assert_eq!(err.path(), Some("$.items[].name"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(
            err.to_string(),
            "Invalid schema at $.items[].name: Unknown filter: shout"
        );
        assert_eq!(Error::extraction("x").path(), None);
    }
}
