//! Error types for decoding, storage, and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error returned by the recognition facade.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The source audio could not be turned into a waveform.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read WAV data: {0}")]
    Wav(#[from] hound::Error),

    #[error("audio source is empty")]
    Empty,

    #[error("unsupported sample format: {bits}-bit {format}")]
    UnsupportedFormat { bits: u16, format: &'static str },
}

/// Failures surfaced unchanged from a fingerprint store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store write conflict: {0}")]
    WriteConflict(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("invalid config value '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn invalid_display() {
        let err = ConfigError::invalid("fraction", "must lie in (0, 1]");
        assert_eq!(
            err.to_string(),
            "invalid config value 'fraction': must lie in (0, 1]"
        );
    }

    #[test]
    fn read_file_exposes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "mock");
        let err = ConfigError::read_file("/a/b.toml", io);
        assert!(err.to_string().contains("/a/b.toml"));
        assert!(err.source().is_some());
    }

    #[test]
    fn store_errors_pass_through_facade_error() {
        let err: Error = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.to_string(), "store unavailable: connection refused");
        assert!(matches!(err, Error::Store(StoreError::Unavailable(_))));
    }
}
