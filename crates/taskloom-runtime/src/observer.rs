//! Progress and lifecycle observation.
//!
//! The executor forwards lifecycle events and progress updates to an
//! injected [`RunObserver`]. Implementations receive a [`ProgressReporter`];
//! every `report` call doubles as the hard-timeout check, so an
//! implementation that never reports progress cannot be timed out.

use crate::retry::{classify_elapsed, TimeoutKind};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use taskloom_types::config::RetryPolicy;
use taskloom_types::error::{TaskloomError, TaskloomResult};
use taskloom_types::event::{Event, EventPayload, RunEvent};
use taskloom_types::run::{ProgressUpdate, RunId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receives executor output. Implementations must be thread-safe and
/// must not block.
pub trait RunObserver: Send + Sync {
    fn on_progress(&self, _update: &ProgressUpdate) {}

    fn on_event(&self, _event: &RunEvent) {}
}

/// Observer that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Observer that forwards into a bounded channel. Updates are dropped when
/// the receiver falls behind.
pub struct ChannelObserver {
    tx: mpsc::Sender<Event>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, payload: EventPayload) {
        if let Err(e) = self.tx.try_send(Event::new(payload)) {
            debug!(error = %e, "observer channel full or closed, dropping event");
        }
    }
}

impl RunObserver for ChannelObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.forward(EventPayload::Progress(update.clone()));
    }

    fn on_event(&self, event: &RunEvent) {
        self.forward(EventPayload::Run(event.clone()));
    }
}

/// Progress handle passed to an implementation for one attempt.
#[derive(Clone)]
pub struct ProgressReporter {
    run_id: RunId,
    started: Instant,
    policy: RetryPolicy,
    observer: Arc<dyn RunObserver>,
    soft_signalled: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(run_id: RunId, policy: RetryPolicy, observer: Arc<dyn RunObserver>) -> Self {
        Self {
            run_id,
            started: Instant::now(),
            policy,
            observer,
            soft_signalled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Report progress. Returns `Err(HardTimeout)` once the hard timeout has
    /// elapsed; implementations should propagate it with `?`.
    pub fn report(&self, progress: Option<u8>, message: Option<&str>) -> TaskloomResult<()> {
        let elapsed_ms = self.elapsed_ms();
        match classify_elapsed(elapsed_ms, &self.policy) {
            Some(TimeoutKind::Hard) => {
                warn!(
                    run_id = %self.run_id,
                    elapsed_ms,
                    limit_ms = self.policy.hard_timeout_ms,
                    "hard timeout reached, aborting attempt"
                );
                return Err(TaskloomError::HardTimeout {
                    elapsed_ms,
                    limit_ms: self.policy.hard_timeout_ms,
                });
            }
            Some(TimeoutKind::Soft) => {
                if !self.soft_signalled.swap(true, Ordering::SeqCst) {
                    self.observer.on_event(&RunEvent::SoftTimeout {
                        run_id: self.run_id,
                        elapsed_ms,
                    });
                    self.emit(Some("Still working..."), progress, false);
                }
            }
            None => {}
        }
        self.emit(message, progress, false);
        Ok(())
    }

    /// Forward an update without the timeout check. Used by the executor
    /// for its own start/finish updates.
    pub(crate) fn emit(&self, message: Option<&str>, progress: Option<u8>, is_complete: bool) {
        self.observer.on_progress(&ProgressUpdate {
            run_id: self.run_id,
            timestamp: Utc::now(),
            elapsed_ms: self.elapsed_ms(),
            progress: progress.map(|p| p.min(100)),
            message: message.map(str::to_string),
            is_complete,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<ProgressUpdate>>,
        events: Mutex<Vec<RunEvent>>,
    }

    impl RunObserver for Recorder {
        fn on_progress(&self, update: &ProgressUpdate) {
            self.updates.lock().unwrap().push(update.clone());
        }
        fn on_event(&self, event: &RunEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_report_forwards_update() {
        let recorder = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(RunId::new(), RetryPolicy::default(), recorder.clone());
        reporter.report(Some(40), Some("halfway-ish")).unwrap();
        let updates = recorder.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].progress, Some(40));
        assert_eq!(updates[0].message.as_deref(), Some("halfway-ish"));
        assert!(!updates[0].is_complete);
    }

    #[test]
    fn test_report_fails_after_hard_timeout() {
        let policy = RetryPolicy {
            soft_timeout_ms: 0,
            hard_timeout_ms: 0,
            ..RetryPolicy::default()
        };
        let reporter = ProgressReporter::new(RunId::new(), policy, Arc::new(NoopObserver));
        let err = reporter.report(Some(10), None).unwrap_err();
        assert!(err.is_hard_timeout());
    }

    #[test]
    fn test_soft_timeout_signalled_once() {
        let policy = RetryPolicy {
            soft_timeout_ms: 0,
            hard_timeout_ms: 60_000,
            ..RetryPolicy::default()
        };
        let recorder = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(RunId::new(), policy, recorder.clone());
        reporter.report(Some(10), None).unwrap();
        reporter.report(Some(20), None).unwrap();
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RunEvent::SoftTimeout { .. }));
        // one "still working" update plus the two reports
        assert_eq!(recorder.updates.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_channel_observer_delivers_events() {
        let (observer, mut rx) = ChannelObserver::channel(8);
        let run_id = RunId::new();
        observer.on_event(&RunEvent::Completed {
            run_id,
            execution_time_ms: 12,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id, run_id);
        assert!(matches!(
            event.payload,
            EventPayload::Run(RunEvent::Completed { .. })
        ));
    }
}
