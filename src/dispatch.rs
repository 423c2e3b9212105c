//! NFQUEUE front end.
//!
//! Each worker owns one kernel queue. A queued IPv4 packet is given a
//! zeroed Ethernet header, cut into chunks and run through the filter
//! engine; the verdict is accept iff the packet was forwarded.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nfq::{Queue, Verdict};
use tracing::{debug, error, info, warn};

use crate::chunk::{Chunk, ChunkWidth, PacketChunks};
use crate::classifier::{Classifier, FilterEngine, StepOutcome};
use crate::config::FilterConfig;
use crate::control::ControlRegisters;
use crate::error::DispatchError;
use crate::header::ethernet_encapsulate;
use crate::rule_table::SharedRuleTable;
use crate::stats::StatsCounters;
use crate::stream::CountingSink;

const BATCH_LIMIT: usize = 10000;
const QUEUE_MAX_LEN: u32 = 10000;
const IDLE_SLEEP: Duration = Duration::from_micros(100);

fn make_queue(queue_num: u16) -> Result<Queue, io::Error> {
    let mut q = Queue::open()?;
    q.bind(queue_num)?;
    q.set_copy_range(queue_num, 0xFFFF)?;
    q.set_queue_max_len(queue_num, QUEUE_MAX_LEN)?;
    q.set_nonblocking(true);
    Ok(q)
}

// ==========================================
// Per-worker packet filter
// ==========================================

/// Engine plus the chunk plumbing for whole-packet verdicts.
///
/// Only the worker that owns the rule registers applies pending rules;
/// the rest classify against the shared table.
pub struct PacketFilter {
    engine: FilterEngine<Arc<SharedRuleTable>>,
    width: ChunkWidth,
    sink: CountingSink,
    owns_registers: bool,
}

impl PacketFilter {
    pub fn new(
        config: &FilterConfig,
        table: Arc<SharedRuleTable>,
        registers: Arc<ControlRegisters>,
        stats: Arc<StatsCounters>,
        owns_registers: bool,
    ) -> Self {
        let classifier = Classifier::with_stats(config.classifier, table, stats);
        Self {
            engine: FilterEngine::new(classifier, registers),
            width: config.classifier.chunk_width,
            sink: CountingSink::default(),
            owns_registers,
        }
    }

    pub fn engine(&self) -> &FilterEngine<Arc<SharedRuleTable>> {
        &self.engine
    }

    /// Classify a full Ethernet frame. Returns whether it was forwarded.
    ///
    /// Chunks are cut from the frame as the engine asks for them.
    pub fn filter_frame(&mut self, frame: &[u8]) -> bool {
        let before = self.sink.packets;
        let mut source = PacketChunks::new(frame, self.width);
        self.engine.drain(&mut source, &mut self.sink);
        self.sink.packets > before
    }

    /// Classify an L3 packet as handed over by NFQUEUE.
    pub fn filter_ipv4(&mut self, packet: &[u8]) -> bool {
        self.filter_frame(&ethernet_encapsulate(packet))
    }

    /// Work to do while no packet is waiting.
    pub fn idle(&mut self) -> StepOutcome {
        if !self.owns_registers {
            return StepOutcome::Idle;
        }
        self.engine.step(&mut VecDeque::<Chunk>::new(), &mut self.sink)
    }
}

// ==========================================
// Worker threads
// ==========================================

/// Spawn one worker per queue starting at `config.queue_base`.
///
/// Returns once every queue is bound, or with the first setup failure
/// (after stopping the workers that did start).
pub fn spawn_workers(
    config: &FilterConfig,
    table: Arc<SharedRuleTable>,
    registers: Arc<ControlRegisters>,
    stats: Arc<StatsCounters>,
    running: Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>, DispatchError> {
    let (ready_tx, ready_rx) = mpsc::channel::<(u16, io::Result<()>)>();
    let mut handles = Vec::with_capacity(config.workers);

    for worker in 0..config.workers {
        let queue_num = config.queue_base.wrapping_add(worker as u16);
        let filter = PacketFilter::new(
            config,
            table.clone(),
            registers.clone(),
            stats.clone(),
            worker == 0,
        );
        let worker_running = running.clone();
        let ready = ready_tx.clone();

        let handle = thread::Builder::new()
            .name(format!("filter-q{queue_num}"))
            .spawn(move || {
                let queue = match make_queue(queue_num) {
                    Ok(q) => {
                        let _ = ready.send((queue_num, Ok(())));
                        q
                    }
                    Err(e) => {
                        let _ = ready.send((queue_num, Err(e)));
                        return;
                    }
                };
                worker_loop(queue_num, queue, filter, &worker_running);
            });

        match handle {
            Ok(h) => handles.push(h),
            Err(source) => {
                stop(&running, handles);
                return Err(DispatchError::Spawn { worker, source });
            }
        }
    }
    drop(ready_tx);

    for _ in 0..handles.len() {
        let outcome = ready_rx.recv().ok();
        if let Some((queue, Err(source))) = outcome {
            stop(&running, handles);
            return Err(DispatchError::Queue { queue, source });
        }
    }

    info!(workers = handles.len(), queue_base = config.queue_base, "workers ready");
    Ok(handles)
}

fn stop(running: &AtomicBool, handles: Vec<JoinHandle<()>>) {
    running.store(false, Ordering::Relaxed);
    for h in handles {
        let _ = h.join();
    }
}

fn worker_loop(queue_num: u16, mut queue: Queue, mut filter: PacketFilter, running: &AtomicBool) {
    info!(queue = queue_num, "worker started");

    while running.load(Ordering::Relaxed) {
        let mut packet_count = 0;

        while packet_count < BATCH_LIMIT {
            let mut msg = match queue.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            };
            packet_count += 1;

            let forwarded = filter.filter_ipv4(msg.get_payload());
            debug!(
                queue = queue_num,
                len = msg.get_payload().len(),
                forwarded,
                "packet classified"
            );

            msg.set_verdict(if forwarded { Verdict::Accept } else { Verdict::Drop });
            if let Err(e) = queue.verdict(msg) {
                warn!(queue = queue_num, error = %e, "failed to set verdict");
            }
        }

        if packet_count == 0 && filter.idle() == StepOutcome::Idle {
            thread::sleep(IDLE_SLEEP);
        }
    }

    if let Err(e) = queue.unbind(queue_num) {
        error!(queue = queue_num, error = %e, "failed to unbind queue");
    }
    info!(queue = queue_num, "worker stopped");
}
