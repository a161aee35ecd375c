//! Per-call output capture.
//!
//! Every remote call gets a fresh [`CaptureSink`] registered under a random
//! id. The link routes output frames tagged with that id into the sink; once
//! the sink is finished or dropped its id is unregistered, and any output that
//! arrives later for it is discarded instead of reaching another call.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct CaptureRegistry {
    sinks: Arc<DashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl CaptureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> CaptureSink {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.insert(id, tx);
        trace!("Opened capture sink {}", id);
        CaptureSink {
            id,
            registry: self.clone(),
            output: rx,
        }
    }

    /// Routes `text` to the sink `id`. Returns false when no such sink is open.
    pub fn deliver(&self, id: Uuid, text: impl Into<String>) -> bool {
        match self.sinks.get(&id) {
            Some(sink) => sink.send(text.into()).is_ok(),
            None => {
                trace!("Discarding output for closed capture {}", id);
                false
            }
        }
    }

    /// Number of sinks currently open.
    pub fn active(&self) -> usize {
        self.sinks.len()
    }

    fn close(&self, id: &Uuid) {
        self.sinks.remove(id);
    }
}

/// Scoped collector for one call's output. Unregisters itself on drop.
#[derive(Debug)]
pub struct CaptureSink {
    id: Uuid,
    registry: CaptureRegistry,
    output: mpsc::UnboundedReceiver<String>,
}

impl CaptureSink {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Closes the sink and returns everything it received, in order.
    pub fn finish(mut self) -> String {
        self.registry.close(&self.id);
        let mut captured = String::new();
        while let Ok(chunk) = self.output.try_recv() {
            captured.push_str(&chunk);
        }
        captured
    }
}

impl Drop for CaptureSink {
    fn drop(&mut self) {
        self.registry.close(&self.id);
    }
}
