use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Outbound command priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Low,
}

/// Two FIFO queues drained high-first, rate limited by a minimum send interval.
#[derive(Debug)]
pub struct CommandQueue {
    high: VecDeque<Bytes>,
    low: VecDeque<Bytes>,
    delay: Duration,
    last_sent: Option<Instant>,
}

impl CommandQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            high: VecDeque::new(),
            low: VecDeque::new(),
            delay,
            last_sent: None,
        }
    }

    /// Queue a command. Returns `true` when the queues were empty before.
    pub fn push(&mut self, command: Bytes, priority: Priority) -> bool {
        let was_empty = self.is_empty();
        match priority {
            Priority::High => self.high.push_back(command),
            Priority::Low => self.low.push_back(command),
        }
        was_empty
    }

    /// Next command if the send interval has elapsed.
    ///
    /// The interval restarts only when a command is actually returned.
    pub fn pop_at(&mut self, now: Instant) -> Option<Bytes> {
        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.delay {
                return None;
            }
        }
        let command = self.high.pop_front().or_else(|| self.low.pop_front())?;
        self.last_sent = Some(now);
        Some(command)
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
