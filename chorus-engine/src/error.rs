//! Error types for chorus-engine
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Variants carry string payloads so an error captured on a
//! worker thread can be cloned and re-raised to the client that caused it.

use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Decode or decoder-open failure for a specific song
    #[error("decoder error: {uri}: {message}")]
    Decoder { uri: String, message: String },

    /// Device failure local to one output
    #[error("output error: {name}: {message}")]
    Output { name: String, message: String },

    /// Failure while opening or feeding a per-output filter chain
    #[error("filter error: {name}: {message}")]
    Filter { name: String, message: String },

    /// A blocking device call was interrupted; transient, consumed by the
    /// output worker and never surfaced to clients
    #[error("interrupted")]
    Interrupted,

    /// A client supplied an out-of-range or malformed argument
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Queue manipulation errors (bad position, unknown id, ...)
    #[error("queue error: {0}")]
    Queue(String),

    /// Mixer open/volume errors
    #[error("mixer error: {0}")]
    Mixer(String),

    /// Playback engine errors that fit no narrower category
    #[error("playback error: {0}")]
    Playback(String),

    /// Invalid state for the requested operation
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Song URI could not be resolved by the song loader
    #[error("no such song: {0}")]
    NoSuchSong(String),
}

impl Error {
    /// True for the transient interruption marker.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    pub fn decoder(uri: impl Into<String>, message: impl ToString) -> Self {
        Error::Decoder {
            uri: uri.into(),
            message: message.to_string(),
        }
    }

    pub fn output(name: impl Into<String>, message: impl ToString) -> Self {
        Error::Output {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn filter(name: impl Into<String>, message: impl ToString) -> Self {
        Error::Filter {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

impl From<chorus_common::Error> for Error {
    fn from(e: chorus_common::Error) -> Self {
        Error::Argument(e.to_string())
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Which subsystem produced the player's stored error.
///
/// Exposed through the player status so clients can distinguish a song that
/// failed to decode from an output device failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayerErrorKind {
    #[default]
    None,
    Decoder,
    Output,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_marker() {
        assert!(Error::Interrupted.is_interrupted());
        assert!(!Error::Playback("x".into()).is_interrupted());
    }

    #[test]
    fn test_clone_preserves_message() {
        let e = Error::output("alsa", "device busy");
        let c = e.clone();
        assert_eq!(e.to_string(), c.to_string());
    }
}
