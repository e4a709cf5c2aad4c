//! Error types for spectrogram extraction and archive I/O.

use thiserror::Error;

/// Convenience alias for results carrying a [`SpectralError`]
pub type Result<T> = std::result::Result<T, SpectralError>;

#[derive(Error, Debug)]
pub enum SpectralError {
    /// A catalog line could not be split into `key source`.
    ///
    /// Fatal: raised while the catalog is parsed, before any archive I/O.
    #[error("malformed catalog entry at line {line}: {reason}")]
    MalformedCatalogEntry { line: usize, reason: String },

    /// An index line could not be split into `key path:offset`.
    #[error("malformed index entry at line {line}: {reason}")]
    MalformedIndexEntry { line: usize, reason: String },

    /// The audio behind one catalog entry could not be loaded.
    ///
    /// The only per-utterance error; see `ErrorPolicy` for how a run reacts.
    #[error("failed to load audio for '{key}' from '{source_spec}'")]
    AudioLoadFailure {
        key: String,
        source_spec: String,
        #[source]
        source: Box<SpectralError>,
    },

    /// Framing or post-processing parameters are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Archive keys must be non-empty and free of whitespace.
    #[error("invalid archive key '{0}'")]
    InvalidKey(String),

    /// The bytes at a record offset are not a float matrix record.
    #[error("corrupt record at byte {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl SpectralError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        SpectralError::CorruptRecord {
            offset,
            reason: reason.into(),
        }
    }
}
