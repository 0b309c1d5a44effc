//! # Fibonacci Backoff
//!
//! Retry delays for failed reconciles. The sequence grows more slowly than
//! exponential backoff, so a Bundle whose targets briefly fail to write is
//! retried soon while a persistently failing one settles at the cap.
//!
//! With a 5 second minimum and 300 second cap the sequence is
//! 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s, 275s, 300s, 300s, ...
//!
//! ## Usage
//!
//! ```rust
//! use trust_bundle_controller::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(5, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! assert_eq!(backoff.next_backoff_seconds(), 15);
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_secs`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// First delay, also used after `reset`
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_secs` and capped at `max_secs`
    ///
    /// # Example
    ///
    /// ```
    /// use trust_bundle_controller::controller::backoff::FibonacciBackoff;
    ///
    /// let backoff = FibonacciBackoff::new(5, 300);
    /// ```
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max_secs.max(min_secs),
        }
    }

    /// Return the current delay in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        result
    }

    /// Return the current delay as a `Duration` and advance the sequence
    ///
    /// # Example
    ///
    /// ```
    /// use trust_bundle_controller::controller::backoff::FibonacciBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = FibonacciBackoff::new(1, 60);
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
    /// ```
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a successful reconcile
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}
