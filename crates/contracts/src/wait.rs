//! Wait - timeout argument for blocking retrieval

use std::time::{Duration, Instant};

/// How long a blocking call may suspend the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Block until data arrives or the source changes state
    Forever,
    /// Block for at most this long; `Duration::ZERO` polls once
    For(Duration),
}

impl Wait {
    /// Poll once, never block
    pub const POLL: Wait = Wait::For(Duration::ZERO);

    /// Millisecond timeout where any negative value means "infinite".
    pub fn from_millis(timeout_ms: i64) -> Self {
        if timeout_ms < 0 {
            Wait::Forever
        } else {
            Wait::For(Duration::from_millis(timeout_ms as u64))
        }
    }

    /// Absolute deadline for this wait, `None` when infinite.
    ///
    /// Saturates to `Forever` semantics if the deadline cannot be represented.
    pub fn deadline_from(self, now: Instant) -> Option<Instant> {
        match self {
            Wait::Forever => None,
            Wait::For(d) => now.checked_add(d),
        }
    }

    pub fn is_poll(self) -> bool {
        self == Wait::POLL
    }
}

impl From<Duration> for Wait {
    fn from(d: Duration) -> Self {
        Wait::For(d)
    }
}
