//! Single-entry frame memo for nodes that opt into caching.
//!
//! The key is the requested index together with the graph generation at the
//! time the frame was produced. Any link edit, parameter change or signalled
//! output change bumps the generation, so a stale entry can never be served.

use crate::types::Frame;

#[derive(Debug, Clone)]
struct Entry {
    index: usize,
    generation: u64,
    frame: Frame,
}

#[derive(Debug, Clone, Default)]
pub struct FrameCache {
    entry: Option<Entry>,
    hits: u64,
    misses: u64,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the cached frame when both index and generation match.
    pub fn get(&mut self, index: usize, generation: u64) -> Option<Frame> {
        match &self.entry {
            Some(e) if e.index == index && e.generation == generation => {
                self.hits += 1;
                Some(e.frame.clone())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Replace the entry. Capacity is exactly one.
    pub fn store(&mut self, index: usize, generation: u64, frame: Frame) {
        self.entry = Some(Entry {
            index,
            generation,
            frame,
        });
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    pub fn cached_index(&self) -> Option<usize> {
        self.entry.as_ref().map(|e| e.index)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
