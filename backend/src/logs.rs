//! Job event streaming and log setup.
//!
//! Every status change and progress checkpoint of a job is published on a
//! broadcast channel so that observers (the CLI progress printer, tests, an
//! embedding service) can follow jobs live. Events are mirrored to `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::jobs::JobStatus;

const CHANNEL_CAPACITY: usize = 256;

/// Log level attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A single job event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: Uuid,
    pub level: LogLevel,
    /// Status of the job when the event was emitted.
    pub status: JobStatus,
    /// Progress of the job when the event was emitted (0-100).
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: Uuid, status: JobStatus, progress: u8, message: impl Into<String>) -> Self {
        let level = match status {
            JobStatus::Completed => LogLevel::Success,
            JobStatus::Failed => LogLevel::Error,
            JobStatus::Cancelled => LogLevel::Warning,
            JobStatus::Pending | JobStatus::Processing => LogLevel::Info,
        };
        Self {
            job_id,
            level,
            status,
            progress,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

/// Broadcasts job events to every subscriber.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event and mirror it to the log.
    pub fn emit(&self, event: JobEvent) {
        match event.level {
            LogLevel::Info | LogLevel::Success => tracing::info!(
                job = %event.job_id,
                status = %event.status,
                progress = event.progress,
                "{}",
                event.message
            ),
            LogLevel::Warning => tracing::warn!(
                job = %event.job_id,
                status = %event.status,
                progress = event.progress,
                "{}",
                event.message
            ),
            LogLevel::Error => tracing::error!(
                job = %event.job_id,
                status = %event.status,
                progress = event.progress,
                "{}",
                event.message
            ),
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Raw receiver, for callers that want `recv().await`.
    pub fn receiver(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Event stream. Slow consumers see a `Lagged` item instead of blocking
    /// the jobs.
    pub fn subscribe(&self) -> BroadcastStream<JobEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `autoconv=warn` (or `debug` when
/// `verbose`), since job progress is normally followed through
/// [`EventBroadcaster::subscribe`]. Calling this twice is harmless.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "autoconv=debug" } else { "autoconv=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_level_follows_status() {
        let id = Uuid::new_v4();
        assert_eq!(JobEvent::new(id, JobStatus::Completed, 100, "done").level, LogLevel::Success);
        assert_eq!(JobEvent::new(id, JobStatus::Failed, 40, "boom").level, LogLevel::Error);
        assert_eq!(JobEvent::new(id, JobStatus::Processing, 10, "go").level, LogLevel::Info);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let broadcaster = EventBroadcaster::new();
        let mut stream = broadcaster.subscribe();
        let id = Uuid::new_v4();

        broadcaster.emit(JobEvent::new(id, JobStatus::Processing, 50, "halfway"));

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.job_id, id);
        assert_eq!(event.progress, 50);
        assert_eq!(event.message, "halfway");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.emit(JobEvent::new(Uuid::new_v4(), JobStatus::Pending, 0, "queued"));
    }
}
