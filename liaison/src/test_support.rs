//! Fakes shared by unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{ChatError, ChatResult, ErrorSink};
use crate::websocket::{ClientEvent, Emitter};

/// Emitter that records frames instead of sending them.
#[derive(Default)]
pub struct RecordingEmitter {
    connected: AtomicBool,
    sent: Mutex<Vec<ClientEvent>>,
}

impl RecordingEmitter {
    pub fn connected() -> Self {
        let emitter = Self::default();
        emitter.set_connected(true);
        emitter
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Drain everything emitted so far.
    pub fn take(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Emitter for RecordingEmitter {
    fn emit(&self, event: ClientEvent) -> ChatResult<()> {
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }
        self.sent.lock().unwrap().push(event);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Sink that keeps the context of every reported error.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn contexts(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(context, _)| context.clone())
            .collect()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, context: &str, error: &ChatError) {
        self.reports
            .lock()
            .unwrap()
            .push((context.to_string(), error.to_string()));
    }
}
