//! Result delivery
//!
//! The session pushes events into an unbounded channel and never waits on
//! the consumer. A listener task drains the channel on the runtime, which
//! is where UI code should pick results up.

use crate::results::ClassificationResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// What a session reports
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierEvent {
    Results(ClassificationResult),
    Error(String),
}

/// Receives session output on the listener task
pub trait ClassifierListener: Send + Sync + 'static {
    fn on_error(&self, message: &str);
    fn on_results(&self, result: &ClassificationResult, inference_time: Duration);
}

/// Sending half handed to the session
#[derive(Debug, Clone)]
pub struct ResultSink {
    sender: mpsc::UnboundedSender<ClassifierEvent>,
}

impl ResultSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClassifierEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Returns false when nobody is listening any more
    pub fn results(&self, result: ClassificationResult) -> bool {
        self.send(ClassifierEvent::Results(result))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.send(ClassifierEvent::Error(message.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn send(&self, event: ClassifierEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!("Result receiver dropped, discarding event");
                false
            }
        }
    }
}

/// Drain `events` into `listener` until every sink is dropped
pub fn spawn_listener<L: ClassifierListener>(
    mut events: mpsc::UnboundedReceiver<ClassifierEvent>,
    listener: Arc<L>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClassifierEvent::Results(result) => {
                    listener.on_results(&result, result.inference_time)
                }
                ClassifierEvent::Error(message) => listener.on_error(&message),
            }
        }
        debug!("Result listener stopped");
    })
}
