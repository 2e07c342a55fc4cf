//! Parsers for human-written configuration values.

mod duration;
mod size;

pub use duration::parse_duration;
pub use size::parse_size;

/// Error returned when a size or duration string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse '{input}': {message}")]
pub struct ParseError {
    pub input: String,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(input: &str, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            message: message.into(),
        }
    }
}
