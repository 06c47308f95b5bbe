//! Unified error types for the sound agent.
//!
//! Every component owns a small closed error enum so callers can tell
//! retryable conditions (a context poll timing out) from fatal ones (a
//! normalization bound missing at startup) without matching on strings.
//! The binary wraps them in `anyhow` at the process boundary.

use core::fmt;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A feature in the contract order has no (min, max) bound.
    MissingBound(String),
    /// A bound has `min > max` or a non-finite endpoint.
    InvalidBound(String),
    /// The inference engine expects a different feature count.
    FeatureLengthMismatch { expected: usize, actual: usize },
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Config or model file could not be read.
    Io(String),
    /// Config or model file could not be parsed.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBound(name) => write!(f, "missing normalization bound for '{name}'"),
            Self::InvalidBound(name) => write!(f, "invalid normalization bound for '{name}'"),
            Self::FeatureLengthMismatch { expected, actual } => write!(
                f,
                "model expects {expected} features, encoder produces {actual}"
            ),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Context poll errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The request did not complete within the poll timeout.
    Timeout,
    /// Connection refused, DNS failure, non-2xx status.
    Network(String),
    /// Response body did not carry the expected fields.
    Malformed(String),
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

impl std::error::Error for ContextError {}

// ---------------------------------------------------------------------------
// Inference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Engine not loaded or refused the call.
    Unavailable(String),
    /// The call overran the inference timeout; its result is discarded.
    Timeout,
    /// Input vector length differs from the model's input layer.
    InputShape { expected: usize, actual: usize },
    /// Output shape or values violate the contract with the translator.
    MalformedOutput(String),
}

impl InferenceError {
    /// Malformed output is a contract violation and is surfaced, not retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "engine unavailable: {msg}"),
            Self::Timeout => write!(f, "inference timed out"),
            Self::InputShape { expected, actual } => {
                write!(f, "input has {actual} features, model expects {expected}")
            }
            Self::MalformedOutput(msg) => write!(f, "malformed output: {msg}"),
        }
    }
}

impl std::error::Error for InferenceError {}

// ---------------------------------------------------------------------------
// Publish errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Transport not connected or request queue closed.
    Disconnected,
    /// Payload could not be serialised.
    Encode(String),
    /// Transport rejected the message.
    Transport(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "transport disconnected"),
            Self::Encode(msg) => write!(f, "encode failed: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for PublishError {}

// ---------------------------------------------------------------------------
// Inbound message errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Payload is not valid UTF-8 / JSON.
    Decode(String),
    /// A required field is missing or has the wrong type.
    InvalidField(&'static str),
    /// Control payload named a command this agent does not know.
    UnknownCommand(String),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "decode failed: {msg}"),
            Self::InvalidField(field) => write!(f, "invalid field '{field}'"),
            Self::UnknownCommand(cmd) => write!(f, "unknown command '{cmd}'"),
        }
    }
}

impl std::error::Error for MessageError {}
