//! Register-style control interface.
//!
//! The control plane programs rules through three registers (address,
//! port, action) and reads four 64-bit counters, all at fixed byte
//! offsets. Writing the action register commits the triple; the data path
//! picks it up the next time its chunk source is empty and acknowledges
//! the commit.

use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, info};

use crate::error::{ControlError, RuleParseError};
use crate::rule_table::{Action, RuleKey};
use crate::stats::{StatsCounters, StatsSnapshot};

/// 32-bit rule address.
pub const IPV4_ADDR_REG: u32 = 0x10;
/// 16-bit rule port.
pub const UDP_PORT_REG: u32 = 0x18;
/// 8-bit rule action; writing it commits the rule.
pub const RULE_ACTION_REG: u32 = 0x20;
pub const STATS_PKT_IN_REG: u32 = 0x28;
pub const STATS_PHIT_IN_REG: u32 = 0x40;
pub const STATS_PKT_FORWD_REG: u32 = 0x58;
pub const STATS_PKT_DROP_REG: u32 = 0x70;

const ACK_POLL_INTERVAL: Duration = Duration::from_micros(50);

impl FromStr for RuleKey {
    type Err = RuleParseError;

    /// `"<ipv4>:<port>"`, port non-zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, port) = s
            .split_once(':')
            .ok_or_else(|| RuleParseError::MissingColon(s.to_string()))?;

        let addr: Ipv4Addr = addr.parse().map_err(|_| RuleParseError::InvalidAddress {
            rule: s.to_string(),
            addr: addr.to_string(),
        })?;
        let port: u16 = port.parse().map_err(|_| RuleParseError::InvalidPort {
            rule: s.to_string(),
            port: port.to_string(),
        })?;
        if port == 0 {
            return Err(RuleParseError::ZeroPort(s.to_string()));
        }

        Ok(RuleKey::new(addr, port))
    }
}

/// A committed rule waiting to be written into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRule {
    pub seq: u64,
    pub key: RuleKey,
    pub action: Action,
}

// ==========================================
// Register file shared by control plane and data path
// ==========================================

#[derive(Debug)]
pub struct ControlRegisters {
    ipv4_addr: AtomicU32,
    udp_port: AtomicU32,
    action: AtomicU32,
    /// Triple captured by the last action write: addr << 24 | port << 8 | action.
    committed: AtomicU64,
    commit_seq: AtomicU64,
    applied_seq: AtomicU64,
    stats: Arc<StatsCounters>,
}

impl ControlRegisters {
    pub fn new(stats: Arc<StatsCounters>) -> Self {
        Self {
            ipv4_addr: AtomicU32::new(0),
            udp_port: AtomicU32::new(0),
            action: AtomicU32::new(0),
            committed: AtomicU64::new(0),
            commit_seq: AtomicU64::new(0),
            applied_seq: AtomicU64::new(0),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<StatsCounters> {
        &self.stats
    }

    /// Register write. Values are truncated to the register width; writes
    /// to the read-only counter registers and unknown offsets are ignored.
    pub fn write32(&self, offset: u32, value: u32) {
        match offset {
            IPV4_ADDR_REG => self.ipv4_addr.store(value, Ordering::Relaxed),
            UDP_PORT_REG => self.udp_port.store(value & 0xFFFF, Ordering::Relaxed),
            RULE_ACTION_REG => {
                let action = value & 0xFF;
                self.action.store(action, Ordering::Relaxed);
                let triple = (u64::from(self.ipv4_addr.load(Ordering::Relaxed)) << 24)
                    | (u64::from(self.udp_port.load(Ordering::Relaxed)) << 8)
                    | u64::from(action);
                self.committed.store(triple, Ordering::Release);
                self.commit_seq.fetch_add(1, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Register read. 64-bit counters are exposed as a low word at their
    /// offset and a high word at offset + 4.
    pub fn read32(&self, offset: u32) -> u32 {
        match offset {
            IPV4_ADDR_REG => self.ipv4_addr.load(Ordering::Relaxed),
            UDP_PORT_REG => self.udp_port.load(Ordering::Relaxed),
            RULE_ACTION_REG => self.action.load(Ordering::Relaxed),
            _ => match self.counter_at(offset & !0x7) {
                Some(value) if offset & 0x4 == 0 => value as u32,
                Some(value) => (value >> 32) as u32,
                None => 0,
            },
        }
    }

    /// Two 32-bit reads, low word first.
    pub fn read64(&self, offset: u32) -> u64 {
        let low = self.read32(offset) as u64;
        let high = self.read32(offset + 4) as u64;
        (high << 32) | low
    }

    fn counter_at(&self, offset: u32) -> Option<u64> {
        match offset {
            STATS_PKT_IN_REG => Some(self.stats.packets_in()),
            STATS_PHIT_IN_REG => Some(self.stats.chunks_in()),
            STATS_PKT_FORWD_REG => Some(self.stats.packets_forwarded()),
            STATS_PKT_DROP_REG => Some(self.stats.packets_dropped()),
            _ => None,
        }
    }

    /// Stage and commit a rule: address, then port, then action.
    /// Returns the commit sequence number.
    pub fn write_rule(&self, addr: Ipv4Addr, port: u16, action: Action) -> u64 {
        self.write32(IPV4_ADDR_REG, u32::from(addr));
        self.write32(UDP_PORT_REG, port as u32);
        self.write32(RULE_ACTION_REG, action.code() as u32);
        self.commit_seq()
    }

    pub fn commit_seq(&self) -> u64 {
        self.commit_seq.load(Ordering::Acquire)
    }

    pub fn applied_seq(&self) -> u64 {
        self.applied_seq.load(Ordering::Acquire)
    }

    /// The committed rule, if it is newer than `applied`.
    ///
    /// The triple is the one captured by the action write, so address and
    /// port writes staged after a commit never leak into it.
    pub fn pending(&self, applied: u64) -> Option<PendingRule> {
        let seq = self.commit_seq();
        if seq <= applied {
            return None;
        }
        let triple = self.committed.load(Ordering::Acquire);
        let addr = Ipv4Addr::from((triple >> 24) as u32);
        let port = (triple >> 8) as u16;
        let action = Action::from_code(triple as u8);
        Some(PendingRule {
            seq,
            key: RuleKey::new(addr, port),
            action,
        })
    }

    pub fn acknowledge(&self, seq: u64) {
        self.applied_seq.fetch_max(seq, Ordering::Release);
    }
}

// ==========================================
// Control plane
// ==========================================

/// Host-side driver for the register file.
#[derive(Debug)]
pub struct ControlPlane {
    registers: Arc<ControlRegisters>,
    ack_timeout: Duration,
    writer: Mutex<()>,
}

impl ControlPlane {
    pub fn new(registers: Arc<ControlRegisters>, ack_timeout: Duration) -> Self {
        Self {
            registers,
            ack_timeout,
            writer: Mutex::new(()),
        }
    }

    pub fn registers(&self) -> &Arc<ControlRegisters> {
        &self.registers
    }

    /// Parse `"<ipv4>:<port>"` and program it with `action`.
    pub fn update_rule(&self, rule: &str, action: Action) -> Result<RuleKey, ControlError> {
        let key: RuleKey = rule.parse()?;
        self.install(key, action)?;
        Ok(key)
    }

    /// Program one rule and wait until the data path has applied it.
    ///
    /// Rules go through the registers one at a time; the next one is not
    /// staged until the previous commit is acknowledged.
    pub fn install(&self, key: RuleKey, action: Action) -> Result<(), ControlError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = self.registers.write_rule(key.addr, key.port, action);
        debug!(rule = %key, %action, seq, "rule committed");
        self.wait_applied(seq)?;
        info!(rule = %key, %action, "rule installed");
        Ok(())
    }

    /// Bootstrap a rule list; every entry forwards.
    pub fn install_rules(&self, rules: &[RuleKey]) -> Result<(), ControlError> {
        for key in rules {
            self.install(*key, Action::Forward)?;
        }
        Ok(())
    }

    pub fn wait_applied(&self, seq: u64) -> Result<(), ControlError> {
        let start = Instant::now();
        while self.registers.applied_seq() < seq {
            if start.elapsed() >= self.ack_timeout {
                return Err(ControlError::Timeout {
                    seq,
                    waited_ms: start.elapsed().as_millis(),
                });
            }
            thread::sleep(ACK_POLL_INTERVAL);
        }
        Ok(())
    }

    /// Counter values read through the statistics registers.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_in: self.registers.read64(STATS_PKT_IN_REG),
            chunks_in: self.registers.read64(STATS_PHIT_IN_REG),
            packets_forwarded: self.registers.read64(STATS_PKT_FORWD_REG),
            packets_dropped: self.registers.read64(STATS_PKT_DROP_REG),
        }
    }

    /// Render counters as a timestamped table. With `previous` and the
    /// elapsed time, per-second rates are added.
    pub fn report(&self, title: &str, previous: Option<(&StatsSnapshot, Duration)>) -> String {
        let now = self.stats();
        let now_str = Local::now().format("%H:%M:%S").to_string();
        let rule = "-".repeat(60);

        let mut out = String::new();
        let _ = writeln!(out, "\n[{now_str}] {title}");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "{:<20} | {:>16} | {:>16}", "Counter", "Total", "Rate (/s)");
        let _ = writeln!(out, "{rule}");

        let rates = previous.map(|(prev, elapsed)| (now.since(prev), elapsed.as_secs_f64()));
        let rows = [
            ("packets_in", now.packets_in, rates.map(|(d, _)| d.packets_in)),
            ("chunks_in", now.chunks_in, rates.map(|(d, _)| d.chunks_in)),
            (
                "packets_forwarded",
                now.packets_forwarded,
                rates.map(|(d, _)| d.packets_forwarded),
            ),
            (
                "packets_dropped",
                now.packets_dropped,
                rates.map(|(d, _)| d.packets_dropped),
            ),
        ];
        for (name, total, delta) in rows {
            let rate = match (delta, rates) {
                (Some(d), Some((_, secs))) if secs > 0.0 => format!("{:.1}", d as f64 / secs),
                _ => "-".to_string(),
            };
            let _ = writeln!(out, "{name:<20} | {total:>16} | {rate:>16}");
        }
        let _ = writeln!(out, "{}", "=".repeat(60));
        out
    }
}
