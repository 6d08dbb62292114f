//! Bounded in-memory history of device output.

use std::collections::VecDeque;

/// Lines kept by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 300;

/// Ring buffer of the most recent device lines, oldest first.
#[derive(Debug, Clone)]
pub struct LineHistory {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for LineHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl LineHistory {
    /// Create a history holding at most `capacity` lines. Zero disables it.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines
                .pop_front();
        }
        self.lines
            .push_back(line.into());
    }

    /// Copy of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .iter()
            .cloned()
            .collect()
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether no lines are retained.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Maximum number of retained lines.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
