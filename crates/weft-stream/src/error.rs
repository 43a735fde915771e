//! Stream store errors.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Transport-level failure (connect, I/O, timeout). Worth retrying.
    Connection(String),
    /// The server answered but the request or response was wrong.
    Protocol(String),
    /// A group operation referenced a group that does not exist.
    GroupMissing { stream: String, group: String },
}

impl StreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Connection(_))
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Connection(msg) => write!(f, "stream connection error: {msg}"),
            StreamError::Protocol(msg) => write!(f, "stream protocol error: {msg}"),
            StreamError::GroupMissing { stream, group } => {
                write!(f, "consumer group '{group}' missing on stream '{stream}'")
            }
        }
    }
}

impl std::error::Error for StreamError {}
