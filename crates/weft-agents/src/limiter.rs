//! Sliding-window rate limiter for the LLM fallback path.
//!
//! Not a token bucket: the budget is "at most `max` acquisitions within any
//! rolling `window`", which is what the fallback contract specifies. An
//! exhausted window is not an error — callers tag the envelope
//! `fallback="suppressed"` and move on.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct SlidingWindow {
    max: usize,
    window: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: Mutex::new(VecDeque::new()),
        }
    }

    /// Consume one slot if the rolling window has budget.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("limiter lock poisoned");
        while let Some(front) = hits.front() {
            if now.duration_since(*front) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }
        if hits.len() >= self.max {
            return false;
        }
        hits.push_back(now);
        true
    }

    /// Remaining budget right now (tests, status surfaces).
    pub fn remaining(&self) -> usize {
        let now = Instant::now();
        let hits = self.hits.lock().expect("limiter lock poisoned");
        let live = hits
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count();
        self.max.saturating_sub(live)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
