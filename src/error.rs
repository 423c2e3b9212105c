//! Configuration-time error types.
//!
//! The per-chunk data path is total and never returns these; they only
//! surface while the filter is being set up or reprogrammed.

use std::io;

/// A `"<ipv4>:<port>"` rule string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("rule '{0}' is missing the ':' separator")]
    MissingColon(String),
    #[error("rule '{rule}' has an invalid IPv4 address '{addr}'")]
    InvalidAddress { rule: String, addr: String },
    #[error("rule '{rule}' has an invalid UDP port '{port}'")]
    InvalidPort { rule: String, port: String },
    #[error("rule '{0}' uses port 0")]
    ZeroPort(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk width must be between 1 and {max} bytes, got {actual}")]
    ChunkWidth { max: usize, actual: usize },
    #[error("rule table capacity must be a non-zero power of two, got {0}")]
    Capacity(usize),
    #[error("at least one worker is required")]
    Workers,
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("rule commit {seq} was not applied within {waited_ms} ms")]
    Timeout { seq: u64, waited_ms: u128 },
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to set up NFQUEUE {queue}: {source}")]
    Queue {
        queue: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },
}
