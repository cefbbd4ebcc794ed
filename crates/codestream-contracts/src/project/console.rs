use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Status lines received per variant, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionConsoles {
    lines: BTreeMap<usize, Vec<String>>,
}

impl ExecutionConsoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, variant: usize, line: impl Into<String>) {
        self.lines.entry(variant).or_default().push(line.into());
    }

    pub fn lines(&self, variant: usize) -> &[String] {
        self.lines
            .get(&variant)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn variants(&self) -> impl Iterator<Item = usize> + '_ {
        self.lines.keys().copied()
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
