use crate::types::Job;

/// Lifecycle events a worker emits, broadcast to anyone who subscribed.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted(Job),
    JobCompleted(Job),
    JobFailed(Job, String),
    JobStalled(Vec<i32>),
    Paused,
    Resumed,
}

/// A worker's event bus. `tokio::sync::broadcast` gives every subscriber its
/// own lagging-tolerant receiver without the worker needing to track a list
/// of callbacks.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<WorkerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkerEvent> {
        self.sender.subscribe()
    }

    /// No-op (not an error) if there are currently no subscribers.
    pub fn emit(&self, event: WorkerEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
