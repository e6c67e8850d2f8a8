//! Topic name validation.
//!
//! Subscription topics are opaque names to this bridge; the broker assigns
//! whatever routing semantics it likes. Validation here rejects only the
//! inputs no broker accepts, so configuration mistakes surface before a
//! connection attempt is made.

use std::fmt;

/// Maximum topic name length in bytes (UTF-8 encoded).
pub const MAX_TOPIC_LENGTH: usize = 65_535;

/// Error type for topic validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicValidationError {
    /// Topic is empty (zero length).
    Empty,
    /// Topic exceeds maximum length.
    TooLong,
    /// Topic contains a control character (including U+0000).
    ContainsControlChar,
}

impl fmt::Display for TopicValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicValidationError::Empty => write!(f, "topic name cannot be empty"),
            TopicValidationError::TooLong => {
                write!(
                    f,
                    "topic name exceeds maximum length of {} bytes",
                    MAX_TOPIC_LENGTH
                )
            }
            TopicValidationError::ContainsControlChar => {
                write!(f, "topic name cannot contain control characters")
            }
        }
    }
}

impl std::error::Error for TopicValidationError {}

/// Validate a topic name for subscribing.
///
/// Topic names must:
/// - Not be empty
/// - Not exceed 65535 bytes
/// - Not contain control characters
///
/// # Examples
///
/// ```
/// use trestle_core::topic::validate_topic;
///
/// assert!(validate_topic("orders/incoming").is_ok());
/// assert!(validate_topic("").is_err());
/// ```
pub fn validate_topic(topic: &str) -> Result<(), TopicValidationError> {
    if topic.is_empty() {
        return Err(TopicValidationError::Empty);
    }

    if topic.len() > MAX_TOPIC_LENGTH {
        return Err(TopicValidationError::TooLong);
    }

    if topic.chars().any(char::is_control) {
        return Err(TopicValidationError::ContainsControlChar);
    }

    Ok(())
}
