//! Host-clocked timers.
//!
//! The engine never reads a clock. Every event carries `now` in
//! milliseconds, and [`StudyBrowser::tick`](super::StudyBrowser::tick)
//! fires whatever came due.

use std::collections::BTreeSet;

/// Length of one animation frame in milliseconds.
pub const FRAME_MS: u64 = 16;

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Fires once after `wait_ms` of quiet. Every trigger restarts the wait.
#[derive(Debug, Clone)]
pub struct Debouncer {
    wait_ms: u64,
    deadline: Option<u64>,
}

impl Debouncer {
    pub fn new(wait_ms: u64) -> Self {
        Self {
            wait_ms,
            deadline: None,
        }
    }

    pub fn trigger(&mut self, now: u64) {
        self.deadline = Some(now + self.wait_ms);
    }

    /// `true` exactly once when the quiet period has elapsed.
    pub fn fire(&mut self, now: u64) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

// ---------------------------------------------------------------------------
// FrameThrottle
// ---------------------------------------------------------------------------

/// Collapses any number of requests into one callback per animation frame.
///
/// The first request schedules the next frame; later requests before that
/// frame are absorbed.
#[derive(Debug, Clone, Default)]
pub struct FrameThrottle {
    due: Option<u64>,
}

impl FrameThrottle {
    pub fn request(&mut self, now: u64) {
        if self.due.is_none() {
            self.due = Some(now + FRAME_MS);
        }
    }

    pub fn fire(&mut self, now: u64) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }
}

// ---------------------------------------------------------------------------
// DeferredTasks
// ---------------------------------------------------------------------------

/// Kinds of coalesced layout work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeferredKind {
    Resize,
    Mutation,
}

impl DeferredKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::Mutation => "mutation",
        }
    }
}

/// Keyed tasks behind one shared timer.
///
/// Queuing a kind twice keeps one entry. Each new task restarts the timer,
/// so a burst of notifications runs every queued kind once after the burst.
#[derive(Debug, Clone)]
pub struct DeferredTasks {
    timeout_ms: u64,
    pending: BTreeSet<DeferredKind>,
    deadline: Option<u64>,
}

impl DeferredTasks {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            pending: BTreeSet::new(),
            deadline: None,
        }
    }

    pub fn defer(&mut self, kind: DeferredKind, now: u64) {
        self.pending.insert(kind);
        self.deadline = Some(now + self.timeout_ms);
    }

    /// Drain the queued kinds once the timer has expired.
    pub fn fire(&mut self, now: u64) -> Vec<DeferredKind> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                std::mem::take(&mut self.pending).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
