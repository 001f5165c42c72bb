//! Application-wide error types.

use std::path::Path;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a download/probe failure, surfaced to clients as `error_code`.
///
/// Order matters: [`ErrorKind::classify`] scans substrings top-to-bottom and returns the
/// first match.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("invalid input")]
    InvalidInput,
    #[error("invalid url")]
    InvalidUrl,
    #[error("unsupported url")]
    UnsupportedUrl,
    #[error("age restricted")]
    AgeRestricted,
    #[error("private video")]
    Private,
    #[error("members only")]
    MembersOnly,
    #[error("video unavailable")]
    VideoUnavailable,
    #[error("geo-blocked")]
    GeoBlock,
    #[error("rate limited")]
    RateLimited,
    #[error("forbidden")]
    Forbidden,
    #[error("timed out")]
    Timeout,
    #[error("connection reset")]
    ConnectionReset,
    #[error("extraction failed")]
    ExtractFail,
    #[error("twitter network blocked")]
    TwitterNetworkBlock,
    #[error("recent failure, cooling down")]
    RecentFail,
    #[error("unknown error")]
    Unknown,
}

/// Ordered substring → kind table, first match wins. Mirrors the classification table
/// used by the extractor-stderr triage in the probing pipeline and download supervisor.
const CLASSIFY_TABLE: &[(&str, ErrorKind)] = &[
    ("sign in to confirm your age", ErrorKind::AgeRestricted),
    ("confirm your age", ErrorKind::AgeRestricted),
    ("this video is private", ErrorKind::Private),
    ("private video", ErrorKind::Private),
    ("members-only", ErrorKind::MembersOnly),
    ("join this channel", ErrorKind::MembersOnly),
    ("video unavailable", ErrorKind::VideoUnavailable),
    ("has been removed", ErrorKind::VideoUnavailable),
    ("not available in your country", ErrorKind::GeoBlock),
    ("not available in your location", ErrorKind::GeoBlock),
    ("unsupported url", ErrorKind::UnsupportedUrl),
    ("too many requests", ErrorKind::RateLimited),
    ("429", ErrorKind::RateLimited),
    ("403", ErrorKind::Forbidden),
    ("forbidden", ErrorKind::Forbidden),
    ("timed out", ErrorKind::Timeout),
    ("timeout", ErrorKind::Timeout),
    ("connection reset", ErrorKind::ConnectionReset),
    ("10054", ErrorKind::ConnectionReset),
    ("unable to extract", ErrorKind::ExtractFail),
];

impl ErrorKind {
    /// Classify raw extractor/muxer stderr tail text into an [`ErrorKind`].
    pub fn classify(tail: &str) -> Self {
        let lower = tail.to_ascii_lowercase();
        for (needle, kind) in CLASSIFY_TABLE {
            if lower.contains(needle) {
                return *kind;
            }
        }
        Self::Unknown
    }
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error during {op} on {path}: {source}")]
    IoPath {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("probe failed: {kind}: {message}")]
    Probe { kind: ErrorKind, message: String },

    #[error("download failed: {kind}: {message}")]
    Download { kind: ErrorKind, message: String },

    #[error("recent failure for this url, retry after {retry_after_secs}s")]
    RecentFail { retry_after_secs: u64 },

    #[error("in progress: {stage}")]
    InProgress { stage: String, retry_after_secs: u64 },

    #[error("process error: {0}")]
    Process(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.display().to_string(),
            source,
        }
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn probe(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Probe {
            kind,
            message: message.into(),
        }
    }

    pub fn download(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Download {
            kind,
            message: message.into(),
        }
    }

    /// The [`ErrorKind`] this error should be reported as, if any.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Probe { kind, .. } | Self::Download { kind, .. } => *kind,
            Self::RecentFail { .. } => ErrorKind::RecentFail,
            Self::Validation(_) | Self::Configuration(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_picks_first_match() {
        assert_eq!(
            ErrorKind::classify("ERROR: Sign in to confirm your age"),
            ErrorKind::AgeRestricted
        );
        assert_eq!(
            ErrorKind::classify("This video is private"),
            ErrorKind::Private
        );
        assert_eq!(ErrorKind::classify("HTTP Error 429"), ErrorKind::RateLimited);
        assert_eq!(
            ErrorKind::classify("nonsense nobody recognizes"),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(
            ErrorKind::classify("VIDEO UNAVAILABLE: has been removed"),
            ErrorKind::VideoUnavailable
        );
    }
}
