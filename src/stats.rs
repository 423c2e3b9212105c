use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime packet counters.
///
/// Updated once per completed packet by the classifier; readable from any
/// thread at any time. Each counter is individually atomic but there is no
/// cross-counter snapshot: a reader may see `packets_in` one ahead of
/// `packets_forwarded + packets_dropped`.
#[derive(Debug, Default)]
pub struct StatsCounters {
    packets_in: AtomicU64,
    chunks_in: AtomicU64,
    packets_forwarded: AtomicU64,
    packets_dropped: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one finished packet of `chunks` phits.
    pub fn record_packet(&self, chunks: u64, forwarded: bool) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        self.chunks_in.fetch_add(chunks, Ordering::Relaxed);
        if forwarded {
            self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.packets_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn packets_in(&self) -> u64 {
        self.packets_in.load(Ordering::Relaxed)
    }

    pub fn chunks_in(&self) -> u64 {
        self.chunks_in.load(Ordering::Relaxed)
    }

    pub fn packets_forwarded(&self) -> u64 {
        self.packets_forwarded.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_in: self.packets_in(),
            chunks_in: self.chunks_in(),
            packets_forwarded: self.packets_forwarded(),
            packets_dropped: self.packets_dropped(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_in: u64,
    pub chunks_in: u64,
    pub packets_forwarded: u64,
    pub packets_dropped: u64,
}

impl StatsSnapshot {
    /// Growth since an earlier snapshot.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            packets_in: self.packets_in.saturating_sub(earlier.packets_in),
            chunks_in: self.chunks_in.saturating_sub(earlier.chunks_in),
            packets_forwarded: self.packets_forwarded.saturating_sub(earlier.packets_forwarded),
            packets_dropped: self.packets_dropped.saturating_sub(earlier.packets_dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn record_packet_bumps_exactly_one_outcome() {
        let stats = StatsCounters::new();
        stats.record_packet(5, true);
        stats.record_packet(2, false);

        let snap = stats.snapshot();
        assert_eq!(snap.packets_in, 2);
        assert_eq!(snap.chunks_in, 7);
        assert_eq!(snap.packets_forwarded, 1);
        assert_eq!(snap.packets_dropped, 1);
    }

    #[test]
    fn reading_does_not_perturb() {
        let stats = StatsCounters::new();
        stats.record_packet(1, true);
        assert_eq!(stats.snapshot(), stats.snapshot());
    }

    #[test]
    fn since_reports_delta() {
        let stats = StatsCounters::new();
        stats.record_packet(3, false);
        let before = stats.snapshot();
        stats.record_packet(4, true);

        let delta = stats.snapshot().since(&before);
        assert_eq!(delta.packets_in, 1);
        assert_eq!(delta.chunks_in, 4);
        assert_eq!(delta.packets_forwarded, 1);
        assert_eq!(delta.packets_dropped, 0);
    }

    #[test]
    fn concurrent_writers_add_up() {
        let stats = Arc::new(StatsCounters::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                let stats = stats.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        stats.record_packet(2, true);
                    }
                });
            }
        });
        assert_eq!(stats.packets_in(), 4000);
        assert_eq!(stats.chunks_in(), 8000);
        assert_eq!(stats.packets_forwarded(), 4000);
    }
}
