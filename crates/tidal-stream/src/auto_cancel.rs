// ABOUTME: Auto-cancel trigger that ends a session after a configured delay.
// ABOUTME: Checked on each inbound message, so it only fires mid-stream.

use std::time::Duration;

/// Fires once, on the first message observed at or after `delay` since the
/// session started. A `None` delay disables it.
#[derive(Debug, Clone, Default)]
pub struct AutoCancelTrigger {
    delay: Option<Duration>,
    fired: bool,
}

impl AutoCancelTrigger {
    pub fn new(delay: Option<Duration>) -> Self {
        Self {
            delay,
            fired: false,
        }
    }

    /// A trigger that never fires.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    /// Record a message received `elapsed` after session start. Returns true
    /// exactly once, when the caller should cancel the session.
    pub fn observe(&mut self, elapsed: Duration) -> bool {
        match self.delay {
            Some(delay) if !self.fired && elapsed >= delay => {
                self.fired = true;
                true
            }
            _ => false,
        }
    }
}
