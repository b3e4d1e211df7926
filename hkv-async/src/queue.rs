//! # Command Queue
//!
//! Purpose: Hold pending commands in transmission order.
//!
//! ## Design Principles
//! 1. **Front-Only Removal**: Replies and timeouts consume from the head.
//! 2. **Append by Default**: Only reconnect re-injection prepends.
//! 3. **Release on Empty**: Draining the queue gives back its capacity.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::command::Command;

// Capacity kept after the queue drains; larger buffers are released.
const RETAINED_CAPACITY: usize = 16;

/// FIFO of commands awaiting transmission or reply.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    items: VecDeque<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            items: VecDeque::with_capacity(RETAINED_CAPACITY),
        }
    }

    /// Appends a command behind everything already queued.
    pub fn enqueue(&mut self, command: Command) {
        self.items.push_back(command);
    }

    /// Puts a command ahead of everything already queued.
    pub fn enqueue_front(&mut self, command: Command) {
        self.items.push_front(command);
    }

    pub fn peek_front(&self) -> Option<&Command> {
        self.items.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut Command> {
        self.items.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<Command> {
        let command = self.items.pop_front();
        if self.items.is_empty() {
            self.items.shrink_to(RETAINED_CAPACITY);
        }
        command
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drops every queued command and returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        self.items.shrink_to(RETAINED_CAPACITY);
        dropped
    }

    /// Removes every command older than `timeout`, preserving the order of
    /// the survivors. With `protect_head` the current head is never removed.
    pub fn evict_expired(
        &mut self,
        now: Instant,
        timeout: Duration,
        protect_head: bool,
    ) -> Vec<Command> {
        let mut kept = VecDeque::with_capacity(self.items.len());
        let mut evicted = Vec::new();
        for (idx, command) in self.items.drain(..).enumerate() {
            if idx == 0 && protect_head {
                kept.push_back(command);
            } else if command.age(now) > timeout {
                evicted.push(command);
            } else {
                kept.push_back(command);
            }
        }
        self.items = kept;
        evicted
    }
}
