//! Typing indicators, both directions.
//!
//! Both halves are deadline-driven state machines: they never sleep
//! themselves. The owner asks for [`deadline`](TypingDebouncer::deadline),
//! waits until then, and calls `poll`.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{TYPING_EXPIRY, TYPING_IDLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Local side: turns keystrokes into start/stop signals.
///
/// idle --(non-empty input)--> signaling: emit Start, arm idle timer.
/// signaling --(input)--> signaling: re-arm the timer, emit nothing.
/// signaling --(timer fires)--> idle: emit Stop.
/// signaling --(input becomes empty)--> idle: emit Stop at once.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    idle: Duration,
    deadline: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_IDLE)
    }
}

impl TypingDebouncer {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: None,
        }
    }

    pub fn is_signaling(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn on_input(&mut self, text: &str, now: Instant) -> Option<TypingSignal> {
        if text.is_empty() {
            return self.cancel().then_some(TypingSignal::Stop);
        }
        let was_signaling = self.is_signaling();
        self.deadline = Some(now + self.idle);
        (!was_signaling).then_some(TypingSignal::Start)
    }

    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    /// Drop the timer. Returns whether a Start was outstanding.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}

/// Remote side: whether the counterpart is typing, with a safety expiry in
/// case the matching hide event is lost.
#[derive(Debug, Clone)]
pub struct RemoteTyping {
    expiry: Duration,
    until: Option<Instant>,
    user_id: Option<String>,
}

impl Default for RemoteTyping {
    fn default() -> Self {
        Self::new(TYPING_EXPIRY)
    }
}

impl RemoteTyping {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            until: None,
            user_id: None,
        }
    }

    pub fn display(&mut self, user_id: Option<String>, now: Instant) {
        self.until = Some(now + self.expiry);
        self.user_id = user_id;
    }

    pub fn hide(&mut self) {
        self.until = None;
        self.user_id = None;
    }

    /// Current state, ignoring an expiry that has passed but not been polled.
    pub fn is_typing(&self, now: Instant) -> bool {
        matches!(self.until, Some(until) if until > now)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.until
    }

    /// Clear an expired indicator. Returns `true` if it expired on this call.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.until {
            Some(until) if until <= now => {
                self.hide();
                true
            }
            _ => false,
        }
    }
}
