use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::fence::FenceExtractor;

/// Identifies one generating output on a shared connection: a variant of a
/// page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub page: usize,
    pub variant: usize,
}

impl StreamKey {
    pub fn new(page: usize, variant: usize) -> Self {
        Self { page, variant }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.variant)
    }
}

/// Arena of fence extractors, one per `(page, variant)` slot.
///
/// Slots are created on first use and live until `reset`, `evict` or the
/// demux itself is dropped. A demux belongs to a single generation request.
#[derive(Debug, Default)]
pub struct StreamDemux {
    slots: BTreeMap<StreamKey, FenceExtractor>,
}

impl StreamDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, key: StreamKey, fragment: &str) -> String {
        self.slots.entry(key).or_default().push(fragment)
    }

    /// Clears a slot so the next fragment starts outside any block.
    pub fn reset(&mut self, key: StreamKey) {
        if let Some(extractor) = self.slots.get_mut(&key) {
            extractor.reset();
        }
    }

    pub fn evict(&mut self, key: StreamKey) -> bool {
        self.slots.remove(&key).is_some()
    }

    pub fn is_capturing(&self, key: StreamKey) -> bool {
        self.slots
            .get(&key)
            .map(FenceExtractor::is_capturing)
            .unwrap_or(false)
    }

    pub fn keys(&self) -> impl Iterator<Item = StreamKey> + '_ {
        self.slots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
