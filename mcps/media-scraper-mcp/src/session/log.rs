//! Bounded in-memory event log
//!
//! Holds browser console output and one line per tool call for post-hoc
//! diagnostics. Not durable; the oldest line is evicted once the cap is hit.

use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: Mutex<VecDeque<String>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(line.into());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
