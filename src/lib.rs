//! Chunk-streaming UDP packet filter.
//!
//! Packets arrive as fixed-width chunks ("phits"). The classifier rebuilds
//! the Ethernet/IPv4/UDP header as it streams past, looks the destination
//! up once in a Toeplitz-hashed rule table, and forwards or drops every
//! chunk of the packet accordingly.

pub mod chunk;
pub mod classifier;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod header;
pub mod logging;
pub mod rule_table;
pub mod stats;
pub mod stream;

pub use chunk::{Chunk, ChunkWidth, MAX_CHUNK_WIDTH, PacketChunks, join_chunks, split_packet};
pub use classifier::{ChunkOutcome, Classifier, ClassifierState, FilterEngine, StepOutcome};
pub use config::{ClassifierConfig, FilterConfig, KeyEndpoint};
pub use control::{ControlPlane, ControlRegisters, PendingRule};
pub use error::{ConfigError, ControlError, DispatchError, RuleParseError};
pub use header::{HeaderLayout, HeaderReconstructor, ParsedHeader};
pub use rule_table::{
    Action, RuleKey, RuleTable, RuleTableHandle, SharedRuleTable, ToeplitzHash, ToeplitzKey,
};
pub use stats::{StatsCounters, StatsSnapshot};
pub use stream::{ChunkSink, ChunkSource, CountingSink};
