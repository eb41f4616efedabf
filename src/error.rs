//! Error types for the remapper core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Mapping source has an unparsable, out-of-range or conflicting entry
    #[error("malformed mapping at line {line}: {reason}")]
    MalformedMapping { line: u64, reason: String },

    /// Channel outside 0-15 (user-facing 1-16)
    #[error("invalid MIDI channel: {0} (expected 1-16)")]
    InvalidChannel(i64),

    /// Endpoint could not be opened, or was closed/disconnected under us
    #[error("MIDI device error: {0}")]
    Device(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::Device(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::Device(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::Device(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        assert_eq!(
            Error::InvalidChannel(17).to_string(),
            "invalid MIDI channel: 17 (expected 1-16)"
        );
        let err = Error::MalformedMapping {
            line: 2,
            reason: "'x' is not an integer".to_string(),
        };
        assert!(err.to_string().contains("line 2"));
    }
}
