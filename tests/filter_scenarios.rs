use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use phit_filter::header::{Ipv4Header, build_ipv4_frame, build_udp_frame};
use phit_filter::{
    Action, Chunk, ChunkWidth, Classifier, ClassifierConfig, ControlPlane, ControlRegisters,
    FilterEngine, KeyEndpoint, RuleTable, StatsCounters, StepOutcome, join_chunks, logging,
    split_packet,
};

const CLIENT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 40000);
const SERVICE: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 9000);
const UNLISTED: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 6), 9000);
// Lands on the same slot as SERVICE in a 32-entry table.
const COLLIDER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 37), 9000);

struct Harness {
    engine: FilterEngine,
    registers: Arc<ControlRegisters>,
    stats: Arc<StatsCounters>,
    source: VecDeque<Chunk>,
    sink: Vec<Chunk>,
}

impl Harness {
    fn new(config: ClassifierConfig) -> Self {
        let stats = Arc::new(StatsCounters::new());
        let registers = Arc::new(ControlRegisters::new(stats.clone()));
        let classifier = Classifier::with_stats(config, RuleTable::new(), stats.clone());
        Self {
            engine: FilterEngine::new(classifier, registers.clone()),
            registers,
            stats,
            source: VecDeque::new(),
            sink: Vec::new(),
        }
    }

    fn install(&mut self, key: SocketAddrV4, action: Action) {
        self.registers.write_rule(*key.ip(), key.port(), action);
        match self.engine.step(&mut self.source, &mut self.sink) {
            StepOutcome::RuleApplied(rule) => assert_eq!(rule.action, action),
            other => panic!("rule for {key} not applied: {other:?}"),
        }
    }

    /// Stream one frame through and return the forwarded chunks.
    fn send(&mut self, frame: &[u8]) -> Vec<Chunk> {
        let width = self.engine.classifier().config().chunk_width;
        self.source.extend(split_packet(frame, width));
        self.engine.drain(&mut self.source, &mut self.sink);
        std::mem::take(&mut self.sink)
    }
}

#[test]
fn listed_destination_forwards_every_chunk() {
    let mut h = Harness::new(ClassifierConfig::default());
    h.install(SERVICE, Action::Forward);

    let frame = build_udp_frame(CLIENT, SERVICE, &[7u8; 150]);
    let n = ChunkWidth::REFERENCE.chunks_for(frame.len());
    let before = h.stats.snapshot();

    let out = h.send(&frame);
    assert_eq!(out.len(), n);
    assert_eq!(join_chunks(&out), frame);

    let delta = h.stats.snapshot().since(&before);
    assert_eq!(delta.packets_forwarded, 1);
    assert_eq!(delta.packets_dropped, 0);
}

#[test]
fn unlisted_destination_is_dropped() {
    let mut h = Harness::new(ClassifierConfig::default());
    h.install(SERVICE, Action::Forward);

    let out = h.send(&build_udp_frame(CLIENT, UNLISTED, &[0u8; 100]));
    assert!(out.is_empty());
    assert_eq!(h.stats.packets_dropped(), 1);
    assert_eq!(h.stats.packets_forwarded(), 0);
}

#[test]
fn tcp_packet_is_dropped_without_lookup() {
    let mut h = Harness::new(ClassifierConfig::default());
    h.install(SERVICE, Action::Forward);

    let frame = build_ipv4_frame(Ipv4Header::TCP, *CLIENT.ip(), *SERVICE.ip(), &[0u8; 60]);
    assert!(h.send(&frame).is_empty());
    assert_eq!(h.engine.classifier().lookups(), 0);
    assert_eq!(h.stats.packets_dropped(), 1);
}

#[test]
fn five_chunk_packet_counts_five_chunks() {
    for action in [Action::Forward, Action::Drop] {
        let mut h = Harness::new(ClassifierConfig::default());
        h.install(SERVICE, action);

        let frame = build_udp_frame(CLIENT, SERVICE, &[0u8; 250]);
        assert_eq!(split_packet(&frame, ChunkWidth::REFERENCE).len(), 5);
        h.send(&frame);

        let snap = h.stats.snapshot();
        assert_eq!(snap.packets_in, 1);
        assert_eq!(snap.chunks_in, 5);
    }
}

#[test]
fn rule_change_mid_packet_applies_to_next_packet() {
    let mut h = Harness::new(ClassifierConfig::default());
    h.install(SERVICE, Action::Forward);

    let frame = build_udp_frame(CLIENT, SERVICE, &[0u8; 250]);
    let mut chunks: VecDeque<Chunk> = split_packet(&frame, ChunkWidth::REFERENCE).into();

    // First chunk decides, then the source runs dry and a drop rule lands.
    let mut first: VecDeque<Chunk> = chunks.drain(..1).collect();
    assert!(matches!(
        h.engine.step(&mut first, &mut h.sink),
        StepOutcome::Chunk(o) if o.forwarded
    ));
    h.install(SERVICE, Action::Drop);

    h.engine.drain(&mut chunks, &mut h.sink);
    assert_eq!(std::mem::take(&mut h.sink).len(), 5);

    assert!(h.send(&frame).is_empty());
    let snap = h.stats.snapshot();
    assert_eq!(snap.packets_forwarded, 1);
    assert_eq!(snap.packets_dropped, 1);
}

#[test]
fn colliding_rule_overwrites_slot() {
    let mut h = Harness::new(ClassifierConfig::default());
    let table = h.engine.classifier().table();
    assert_eq!(
        table.index(*SERVICE.ip(), SERVICE.port()),
        table.index(*COLLIDER.ip(), COLLIDER.port())
    );

    h.install(SERVICE, Action::Forward);
    h.install(COLLIDER, Action::Drop);

    assert!(h.send(&build_udp_frame(CLIENT, SERVICE, b"x")).is_empty());
    assert!(h.send(&build_udp_frame(CLIENT, COLLIDER, b"x")).is_empty());
}

#[test]
fn narrow_chunks_decide_once_header_is_complete() {
    let config = ClassifierConfig::new(8, KeyEndpoint::Destination, true).unwrap();
    let mut h = Harness::new(config);
    h.install(SERVICE, Action::Forward);

    let frame = build_udp_frame(CLIENT, SERVICE, &[0u8; 62]);
    let total = split_packet(&frame, ChunkWidth::new(8).unwrap()).len();
    assert_eq!(total, 13);

    // Header ends in chunk 5 (byte 41); chunks 0..=4 are held back.
    let out = h.send(&frame);
    assert_eq!(out.len(), total - 5);
    assert_eq!(h.stats.chunks_in(), 13);
    assert_eq!(h.stats.packets_forwarded(), 1);

    assert!(h.send(&build_udp_frame(CLIENT, UNLISTED, &[0u8; 62])).is_empty());
}

#[test]
fn back_to_back_packets_are_classified_independently() {
    let mut h = Harness::new(ClassifierConfig::default());
    h.install(SERVICE, Action::Forward);

    for dst in [SERVICE, UNLISTED, SERVICE] {
        h.source
            .extend(split_packet(&build_udp_frame(CLIENT, dst, &[0u8; 80]), ChunkWidth::REFERENCE));
    }
    h.engine.drain(&mut h.source, &mut h.sink);

    assert_eq!(h.sink.len(), 4);
    assert_eq!(h.sink.iter().filter(|c| c.last).count(), 2);
    let snap = h.stats.snapshot();
    assert_eq!((snap.packets_in, snap.packets_forwarded, snap.packets_dropped), (3, 2, 1));
}

#[test]
fn control_plane_programs_running_engine() {
    logging::init_test();

    let mut h = Harness::new(ClassifierConfig::default());
    let plane = ControlPlane::new(h.registers.clone(), Duration::from_secs(5));
    let running = AtomicBool::new(true);

    thread::scope(|s| {
        let engine = &mut h.engine;
        let running = &running;
        s.spawn(move || {
            let mut source: VecDeque<Chunk> = VecDeque::new();
            let mut sink: Vec<Chunk> = Vec::new();
            while running.load(Ordering::Relaxed) {
                if engine.step(&mut source, &mut sink) == StepOutcome::Idle {
                    thread::yield_now();
                }
            }
        });

        let installed = plane.update_rule("10.0.0.5:9000", Action::Forward);
        let malformed = plane.update_rule("10.0.0.5", Action::Forward);
        running.store(false, Ordering::Relaxed);

        assert!(installed.is_ok());
        assert!(malformed.is_err());
    });

    let frame = build_udp_frame(CLIENT, SERVICE, b"ping");
    assert_eq!(h.send(&frame).len(), 1);

    let snap = plane.stats();
    assert_eq!(snap.packets_in, 1);
    assert_eq!(snap.packets_forwarded, 1);
}
