//! Typed pipeline queues
//!
//! `Input` is a single-consumer FIFO of packets with an open/closed
//! lifecycle; `Output` fans pushes out to every connected input. These are
//! the only channels between pipeline stages, and closing an input is the
//! only way to interrupt a stage blocked on it.

use crate::packet::Packet;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

struct State<T> {
    open: bool,
    pending: VecDeque<Packet<T>>,
}

/// Single-consumer FIFO with an open/closed state.
///
/// `push` on a closed queue is a no-op, `pop` on an empty queue is a no-op,
/// and closing wakes every waiter.
pub struct Input<T> {
    state: Mutex<State<T>>,
    signal: Condvar,
}

impl<T> Default for Input<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Input<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                open: false,
                pending: VecDeque::new(),
            }),
            signal: Condvar::new(),
        }
    }

    pub fn open(&self) {
        self.state.lock().open = true;
    }

    pub fn close(&self) {
        self.state.lock().open = false;
        self.signal.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Drops every pending packet, releasing their pool slots.
    pub fn clear(&self) {
        self.state.lock().pending.clear();
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn push(&self, packet: Packet<T>) {
        let mut state = self.state.lock();
        if state.open {
            state.pending.push_back(packet);
            self.signal.notify_one();
        }
    }

    /// Non-destructive peek at the oldest pending packet.
    pub fn front(&self) -> Option<Packet<T>> {
        self.state.lock().pending.front().cloned()
    }

    pub fn pop(&self) -> Option<Packet<T>> {
        let mut state = self.state.lock();
        if state.open {
            state.pending.pop_front()
        } else {
            None
        }
    }

    /// Blocks until a packet is pending or the queue is closed; returns
    /// whether the queue is still open.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while state.open && state.pending.is_empty() {
            self.signal.wait(&mut state);
        }
        state.open
    }

    /// Bounded wait; returns true when a packet is pending on an open
    /// queue. Used for periodic polling only.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.open && state.pending.is_empty() {
            self.signal.wait_for(&mut state, timeout);
        }
        state.open && !state.pending.is_empty()
    }
}

/// Fan-out endpoint: each push is broadcast to every connected input.
pub struct Output<T> {
    inputs: Mutex<Vec<Arc<Input<T>>>>,
}

impl<T> Default for Output<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Output<T> {
    pub fn new() -> Self {
        Self {
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, packet: Packet<T>) {
        let inputs = self.inputs.lock();
        for input in inputs.iter() {
            input.push(packet.clone());
        }
    }

    pub fn fan_out(&self) -> usize {
        self.inputs.lock().len()
    }
}

pub fn connect<T>(output: &Output<T>, input: &Arc<Input<T>>) {
    output.inputs.lock().push(Arc::clone(input));
}

pub fn disconnect<T>(output: &Output<T>, input: &Arc<Input<T>>) {
    output
        .inputs
        .lock()
        .retain(|candidate| !Arc::ptr_eq(candidate, input));
}
