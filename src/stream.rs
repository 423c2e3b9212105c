use std::collections::VecDeque;

use crate::chunk::{Chunk, PacketChunks};

/// Ordered, non-blocking supply of phits.
pub trait ChunkSource {
    /// Next chunk, or `None` when nothing is waiting. Must not block.
    fn poll(&mut self) -> Option<Chunk>;
}

/// Destination for forwarded phits.
pub trait ChunkSink {
    fn push(&mut self, chunk: Chunk);
}

impl ChunkSource for VecDeque<Chunk> {
    fn poll(&mut self) -> Option<Chunk> {
        self.pop_front()
    }
}

impl ChunkSource for PacketChunks<'_> {
    fn poll(&mut self) -> Option<Chunk> {
        self.next()
    }
}

impl ChunkSink for VecDeque<Chunk> {
    fn push(&mut self, chunk: Chunk) {
        self.push_back(chunk);
    }
}

impl ChunkSink for Vec<Chunk> {
    fn push(&mut self, chunk: Chunk) {
        Vec::push(self, chunk);
    }
}

/// Sink that keeps only a tally of what was forwarded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingSink {
    pub chunks: u64,
    pub packets: u64,
}

impl CountingSink {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl ChunkSink for CountingSink {
    fn push(&mut self, chunk: Chunk) {
        self.chunks += 1;
        if chunk.last {
            self.packets += 1;
        }
    }
}
