//! Fixed-capacity rule table keyed by a Toeplitz hash of (IPv4, port).
//!
//! The table never grows and never chains: a key's slot is
//! `hash & (capacity - 1)` and an insert overwrites whatever lives there,
//! even when that was a different key. An empty slot reads as
//! [`Action::Drop`].

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::ConfigError;

pub const DEFAULT_CAPACITY: usize = 32;

/// Hash input width: 32 address bits followed by 16 port bits.
pub const HASH_INPUT_BITS: usize = 48;

/// Verdict attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Action {
    #[default]
    Drop = 0,
    Forward = 1,
}

impl Action {
    /// Only code 1 forwards; every other code behaves as drop.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Action::Forward,
            _ => Action::Drop,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Drop => f.write_str("drop"),
            Action::Forward => f.write_str("forward"),
        }
    }
}

/// (address, port) pair a rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl RuleKey {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

// ==========================================
// Toeplitz hash
// ==========================================

/// 320-bit hash seed, stored as ten 32-bit words. Key bit 0 is the least
/// significant bit of word 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToeplitzKey([u32; 10]);

impl ToeplitzKey {
    pub const DEFAULT: ToeplitzKey = ToeplitzKey([
        0xD6E31417, 0x376CC87E, 0x011BA7A6, 0xDC1B91BB, 0x7872E224, 0xBFD0404B, 0x260374B8,
        0xD9270F6F, 0x18DC4386, 0x7C9C37DE,
    ]);

    /// Key bits `offset..offset + 32`. `offset` must be at most 288.
    pub fn window(&self, offset: usize) -> u32 {
        let word = offset / 32;
        let shift = offset % 32;
        if shift == 0 {
            self.0[word]
        } else {
            (self.0[word] >> shift) | (self.0[word + 1] << (32 - shift))
        }
    }
}

impl Default for ToeplitzKey {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Toeplitz hash over the 48-bit (address, port) input.
///
/// Every input bit owns one precomputed 32-bit window of the key; the hash
/// is the XOR of the windows of all set bits, so the bits can be folded in
/// any order.
#[derive(Debug, Clone)]
pub struct ToeplitzHash {
    windows: [u32; HASH_INPUT_BITS],
}

impl ToeplitzHash {
    pub fn new(key: &ToeplitzKey) -> Self {
        let mut windows = [0u32; HASH_INPUT_BITS];
        for (bit, w) in windows.iter_mut().enumerate() {
            *w = key.window(bit);
        }
        Self { windows }
    }

    /// Input bit `i < 32` is address bit `i`; bit `32 + j` is port bit `j`.
    pub fn input(addr: Ipv4Addr, port: u16) -> u64 {
        u64::from(u32::from(addr)) | (u64::from(port) << 32)
    }

    /// Window contributed by input bit `bit` when it is set.
    pub fn window_for_bit(&self, bit: usize) -> u32 {
        self.windows[bit]
    }

    pub fn hash(&self, addr: Ipv4Addr, port: u16) -> u32 {
        let input = Self::input(addr, port);
        self.windows
            .iter()
            .enumerate()
            .filter(|(bit, _)| (input >> bit) & 1 == 1)
            .fold(0, |acc, (_, w)| acc ^ w)
    }
}

impl Default for ToeplitzHash {
    fn default() -> Self {
        Self::new(&ToeplitzKey::DEFAULT)
    }
}

// ==========================================
// Rule table
// ==========================================

#[derive(Debug, Clone)]
pub struct RuleTable {
    hasher: ToeplitzHash,
    slots: Box<[Action]>,
    owners: Box<[Option<RuleKey>]>,
    mask: u32,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::build(DEFAULT_CAPACITY, ToeplitzKey::DEFAULT)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, ConfigError> {
        Self::with_key(capacity, ToeplitzKey::DEFAULT)
    }

    pub fn with_key(capacity: usize, key: ToeplitzKey) -> Result<Self, ConfigError> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > u32::MAX as usize {
            return Err(ConfigError::Capacity(capacity));
        }
        Ok(Self::build(capacity, key))
    }

    fn build(capacity: usize, key: ToeplitzKey) -> Self {
        Self {
            hasher: ToeplitzHash::new(&key),
            slots: vec![Action::Drop; capacity].into_boxed_slice(),
            owners: vec![None; capacity].into_boxed_slice(),
            mask: (capacity - 1) as u32,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn hash(&self, addr: Ipv4Addr, port: u16) -> u32 {
        self.hasher.hash(addr, port)
    }

    pub fn index(&self, addr: Ipv4Addr, port: u16) -> usize {
        (self.hash(addr, port) & self.mask) as usize
    }

    pub fn lookup(&self, addr: Ipv4Addr, port: u16) -> Action {
        self.slots[self.index(addr, port)]
    }

    /// Overwrite the slot for `(addr, port)`.
    ///
    /// Returns the key that previously owned the slot when it was a
    /// different one; that key's rule is gone from this point on.
    pub fn insert(&mut self, addr: Ipv4Addr, port: u16, action: Action) -> Option<RuleKey> {
        let idx = self.index(addr, port);
        let key = RuleKey::new(addr, port);
        self.slots[idx] = action;
        self.owners[idx].replace(key).filter(|prev| *prev != key)
    }

    /// Last key written into a slot, if any.
    pub fn owner(&self, index: usize) -> Option<RuleKey> {
        self.owners.get(index).copied().flatten()
    }

    /// Slots that were written at least once, with their current action.
    pub fn rules(&self) -> impl Iterator<Item = (RuleKey, Action)> + '_ {
        self.owners
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(owner, action)| owner.map(|k| (k, *action)))
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

// ==========================================
// Shared, read-mostly table for multi-worker use
// ==========================================

/// One table shared by every worker.
///
/// Readers take an `Arc` snapshot; a writer copies the current table,
/// updates the copy and swaps the pointer. A reader therefore never sees
/// a half-written slot, and the writer lock keeps writers one at a time.
#[derive(Debug)]
pub struct SharedRuleTable {
    current: RwLock<Arc<RuleTable>>,
    writer: Mutex<()>,
}

impl SharedRuleTable {
    pub fn new(table: RuleTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleTable> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lookup(&self, addr: Ipv4Addr, port: u16) -> Action {
        self.snapshot().lookup(addr, port)
    }

    pub fn insert(&self, addr: Ipv4Addr, port: u16, action: Action) -> Option<RuleKey> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = RuleTable::clone(&self.snapshot());
        let displaced = next.insert(addr, port, action);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        displaced
    }
}

impl Default for SharedRuleTable {
    fn default() -> Self {
        Self::new(RuleTable::new())
    }
}

/// What the classifier needs from a rule table.
///
/// Named apart from the inherent `lookup`/`insert` so that method calls on
/// an `Arc<SharedRuleTable>` always reach the shared table's `&self` API.
pub trait RuleTableHandle {
    fn action_for(&self, addr: Ipv4Addr, port: u16) -> Action;
    fn set_action(&mut self, addr: Ipv4Addr, port: u16, action: Action) -> Option<RuleKey>;
}

impl RuleTableHandle for RuleTable {
    fn action_for(&self, addr: Ipv4Addr, port: u16) -> Action {
        self.lookup(addr, port)
    }

    fn set_action(&mut self, addr: Ipv4Addr, port: u16, action: Action) -> Option<RuleKey> {
        self.insert(addr, port, action)
    }
}

impl RuleTableHandle for Arc<SharedRuleTable> {
    fn action_for(&self, addr: Ipv4Addr, port: u16) -> Action {
        self.lookup(addr, port)
    }

    fn set_action(&mut self, addr: Ipv4Addr, port: u16, action: Action) -> Option<RuleKey> {
        self.insert(addr, port, action)
    }
}
