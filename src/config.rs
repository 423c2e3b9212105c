use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::chunk::ChunkWidth;
use crate::error::ConfigError;
use crate::rule_table::{DEFAULT_CAPACITY, RuleKey};

/// Which side of the flow keys the rule lookup. Fixed per classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyEndpoint {
    /// (dst address, dst port): the packet-filter mode.
    #[default]
    Destination,
    /// (src address, src port).
    Source,
}

impl FromStr for KeyEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dst" | "dest" | "destination" => Ok(KeyEndpoint::Destination),
            "src" | "source" => Ok(KeyEndpoint::Source),
            other => Err(format!("unknown key endpoint '{other}', expected 'src' or 'dst'")),
        }
    }
}

impl fmt::Display for KeyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEndpoint::Destination => f.write_str("dst"),
            KeyEndpoint::Source => f.write_str("src"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub chunk_width: ChunkWidth,
    pub key_endpoint: KeyEndpoint,
    pub track_stats: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            chunk_width: ChunkWidth::REFERENCE,
            key_endpoint: KeyEndpoint::Destination,
            track_stats: true,
        }
    }
}

impl ClassifierConfig {
    /// Build from a raw chunk width, rejecting widths outside 1..=64.
    pub fn new(
        chunk_width: usize,
        key_endpoint: KeyEndpoint,
        track_stats: bool,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            chunk_width: ChunkWidth::new(chunk_width)?,
            key_endpoint,
            track_stats,
        })
    }
}

/// Everything the binary needs before it touches a packet.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub queue_base: u16,
    pub workers: usize,
    /// Zero runs until signalled.
    pub duration: Duration,
    pub rules: Vec<RuleKey>,
    pub classifier: ClassifierConfig,
    pub table_capacity: usize,
    /// Zero disables live reports.
    pub report_interval: Duration,
    pub ack_timeout: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            queue_base: 0,
            workers: 1,
            duration: Duration::from_secs(10),
            rules: Vec::new(),
            classifier: ClassifierConfig::default(),
            table_capacity: DEFAULT_CAPACITY,
            report_interval: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(1),
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Workers);
        }
        if self.table_capacity == 0 || !self.table_capacity.is_power_of_two() {
            return Err(ConfigError::Capacity(self.table_capacity));
        }
        Ok(())
    }

    /// Parse a comma-separated `"<ipv4>:<port>,..."` list. Empty items are
    /// skipped; any malformed item fails the whole list.
    pub fn parse_rule_list(list: &str) -> Result<Vec<RuleKey>, ConfigError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<RuleKey>().map_err(ConfigError::from))
            .collect()
    }
}
