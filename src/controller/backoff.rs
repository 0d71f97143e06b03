//! # Fibonacci Backoff
//!
//! Progressive retry delays for failing reconciliations.
//!
//! The sequence is `min, min, 2*min, 3*min, 5*min, ...` capped at `max`.
//! Each resource keeps its own [`BackoffState`] so one failing object never
//! slows down the others.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff measured in seconds
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    max_secs: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
            previous: 0,
            current: min_secs,
        }
    }

    /// Return the next delay and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let delay = self.current.min(self.max_secs);
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next;
        delay
    }

    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = self.min_secs;
    }

    /// Delay for the `error_count`-th consecutive error (0-indexed)
    pub fn calculate_for_error_count(error_count: u32, min_secs: u64, max_secs: u64) -> Duration {
        let mut backoff = Self::new(min_secs, max_secs);
        let mut delay = backoff.next_backoff_seconds();
        for _ in 0..error_count {
            delay = backoff.next_backoff_seconds();
            if delay >= backoff.max_secs {
                break;
            }
        }
        Duration::from_secs(delay)
    }
}

/// Backoff progress of one resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

/// Per-resource backoff states keyed by `namespace/name`
#[derive(Debug)]
pub struct BackoffRegistry {
    min_secs: u64,
    max_secs: u64,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffRegistry {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            max_secs,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record an error for `key`; returns the delay and the consecutive error count
    pub fn next_delay(&self, key: &str) -> (u64, u32) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| BackoffState::new(self.min_secs, self.max_secs));
        state.increment_error();
        (state.backoff.next_backoff_seconds(), state.error_count)
    }

    /// Forget the error history of `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_fibonacci_and_capped() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(delays, vec![1, 1, 2, 3, 5, 8, 10, 10]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = FibonacciBackoff::new(2, 60);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.reset();
        assert_eq!(backoff.next_backoff_seconds(), 2);
    }

    #[test]
    fn test_calculate_for_error_count() {
        assert_eq!(FibonacciBackoff::calculate_for_error_count(0, 1, 60), Duration::from_secs(1));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(4, 1, 60), Duration::from_secs(5));
        assert_eq!(FibonacciBackoff::calculate_for_error_count(50, 1, 60), Duration::from_secs(60));
    }

    #[test]
    fn test_registry_tracks_resources_independently() {
        let registry = BackoffRegistry::new(1, 60);
        registry.next_delay("ns/a");
        registry.next_delay("ns/a");
        assert_eq!(registry.next_delay("ns/a"), (2, 3));
        assert_eq!(registry.next_delay("ns/b"), (1, 1));
        registry.reset("ns/a");
        assert_eq!(registry.next_delay("ns/a"), (1, 1));
    }
}
