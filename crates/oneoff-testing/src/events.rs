//! In-memory event recorder for asserting on lifecycle emissions.

use std::sync::{Arc, Mutex, PoisonError};

use oneoff_core::{EventType, JobEvent, JobEventHandler, JobId};

/// Event handler that stores every event it sees.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventHandler {
    events: Arc<Mutex<Vec<JobEvent>>>,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in arrival order.
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Event types recorded for one job, in arrival order.
    pub fn types_for(&self, job_id: JobId) -> Vec<EventType> {
        self.events()
            .into_iter()
            .filter(|e| e.job.id == job_id)
            .map(|e| e.event_type)
            .collect()
    }
}

#[async_trait::async_trait]
impl JobEventHandler for RecordingEventHandler {
    async fn on_event(&self, event: JobEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}
