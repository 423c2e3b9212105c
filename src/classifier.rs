use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::config::ClassifierConfig;
use crate::control::{ControlRegisters, PendingRule};
use crate::header::HeaderReconstructor;
use crate::rule_table::{Action, RuleTable, RuleTableHandle};
use crate::stats::StatsCounters;
use crate::stream::{ChunkSink, ChunkSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    /// Header not complete yet; nothing is forwarded.
    AwaitingHeader,
    /// Verdict latched for the rest of the packet.
    Decided(Action),
}

/// What happened to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Position of the chunk in its packet.
    pub index: usize,
    pub forwarded: bool,
    pub end_of_packet: bool,
}

/// Per-packet forward/drop state machine.
///
/// One chunk in, at most one chunk out, nothing buffered. The rule table
/// is consulted at most once per packet, on the chunk that completes the
/// header; that verdict then applies to every remaining chunk.
#[derive(Debug)]
pub struct Classifier<T: RuleTableHandle = RuleTable> {
    config: ClassifierConfig,
    table: T,
    reconstructor: HeaderReconstructor,
    state: ClassifierState,
    stats: Option<Arc<StatsCounters>>,
    lookups: u64,
}

impl<T: RuleTableHandle> Classifier<T> {
    /// Classifier with private counters (or none if stats are off).
    pub fn new(config: ClassifierConfig, table: T) -> Self {
        let stats = config.track_stats.then(|| Arc::new(StatsCounters::new()));
        Self::build(config, table, stats)
    }

    /// Classifier that reports into shared counters.
    pub fn with_stats(config: ClassifierConfig, table: T, stats: Arc<StatsCounters>) -> Self {
        let stats = config.track_stats.then_some(stats);
        Self::build(config, table, stats)
    }

    fn build(config: ClassifierConfig, table: T, stats: Option<Arc<StatsCounters>>) -> Self {
        Self {
            config,
            table,
            reconstructor: HeaderReconstructor::new(config.chunk_width),
            state: ClassifierState::AwaitingHeader,
            stats,
            lookups: 0,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    pub fn stats(&self) -> Option<&Arc<StatsCounters>> {
        self.stats.as_ref()
    }

    /// Rule-table lookups issued so far.
    pub fn lookups(&self) -> u64 {
        self.lookups
    }

    /// Classify one chunk and hand it back if it is to be forwarded.
    pub fn process(&mut self, chunk: Chunk) -> Option<Chunk> {
        let outcome = self.classify(&chunk);
        outcome.forwarded.then_some(chunk)
    }

    /// Advance the packet state by one chunk without taking ownership.
    pub fn classify(&mut self, chunk: &Chunk) -> ChunkOutcome {
        let index = self.reconstructor.consume(chunk);

        if self.state == ClassifierState::AwaitingHeader
            && index >= self.reconstructor.layout().decision_chunk()
        {
            self.decide();
        }

        let forwarded = self.state == ClassifierState::Decided(Action::Forward);

        if chunk.last {
            if let Some(stats) = &self.stats {
                stats.record_packet(index as u64 + 1, forwarded);
            }
            self.state = ClassifierState::AwaitingHeader;
        }

        ChunkOutcome {
            index,
            forwarded,
            end_of_packet: chunk.last,
        }
    }

    fn decide(&mut self) {
        let header = self.reconstructor.header();
        let key = match (header.is_ipv4(), header.is_udp()) {
            (Some(true), Some(true)) => header.lookup_key(self.config.key_endpoint),
            _ => None,
        };

        let action = match key {
            Some((addr, port)) => {
                self.lookups += 1;
                self.table.action_for(addr, port)
            }
            None => Action::Drop,
        };
        self.state = ClassifierState::Decided(action);
    }
}

// ==========================================
// Control loop: configuration phase / data phase
// ==========================================

/// Result of one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No chunk waiting and no rule to apply.
    Idle,
    /// No chunk waiting; a committed rule was written into the table.
    RuleApplied(PendingRule),
    /// One chunk was consumed.
    Chunk(ChunkOutcome),
}

/// Drives a classifier from a chunk source into a sink, applying rule
/// updates from the control registers whenever the source is empty.
///
/// Rule inserts and lookups never overlap: both happen inside `step`,
/// and a step does one or the other.
#[derive(Debug)]
pub struct FilterEngine<T: RuleTableHandle = RuleTable> {
    classifier: Classifier<T>,
    registers: Arc<ControlRegisters>,
    applied_seq: u64,
}

impl<T: RuleTableHandle> FilterEngine<T> {
    pub fn new(classifier: Classifier<T>, registers: Arc<ControlRegisters>) -> Self {
        Self {
            classifier,
            registers,
            applied_seq: 0,
        }
    }

    pub fn classifier(&self) -> &Classifier<T> {
        &self.classifier
    }

    pub fn registers(&self) -> &Arc<ControlRegisters> {
        &self.registers
    }

    pub fn step<S, K>(&mut self, source: &mut S, sink: &mut K) -> StepOutcome
    where
        S: ChunkSource + ?Sized,
        K: ChunkSink + ?Sized,
    {
        match source.poll() {
            Some(chunk) => StepOutcome::Chunk(self.forward(chunk, sink)),
            None => match self.apply_pending_rule() {
                Some(rule) => StepOutcome::RuleApplied(rule),
                None => StepOutcome::Idle,
            },
        }
    }

    /// Data phase only: consume chunks until the source runs dry, without
    /// applying pending rules. Returns the number of chunks taken.
    pub fn drain<S, K>(&mut self, source: &mut S, sink: &mut K) -> usize
    where
        S: ChunkSource + ?Sized,
        K: ChunkSink + ?Sized,
    {
        let mut consumed = 0;
        while let Some(chunk) = source.poll() {
            self.forward(chunk, sink);
            consumed += 1;
        }
        consumed
    }

    fn forward<K: ChunkSink + ?Sized>(&mut self, chunk: Chunk, sink: &mut K) -> ChunkOutcome {
        let outcome = self.classifier.classify(&chunk);
        if outcome.forwarded {
            sink.push(chunk);
        }
        outcome
    }

    fn apply_pending_rule(&mut self) -> Option<PendingRule> {
        let rule = self.registers.pending(self.applied_seq)?;

        let displaced = self
            .classifier
            .table_mut()
            .set_action(rule.key.addr, rule.key.port, rule.action);
        if let Some(prev) = displaced {
            warn!(rule = %rule.key, evicted = %prev, "rule overwrote a colliding key");
        }
        debug!(rule = %rule.key, action = %rule.action, seq = rule.seq, "rule applied");

        self.applied_seq = rule.seq;
        self.registers.acknowledge(rule.seq);
        Some(rule)
    }
}
