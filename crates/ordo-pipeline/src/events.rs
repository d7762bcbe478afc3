//! Run events for observers.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! loggers, progress displays, or tests can follow a run without coupling to
//! the engine internals.

use serde::{Deserialize, Serialize};

/// Events emitted during a pipeline run. Every event carries the run's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        fragment_count: usize,
        builder_count: usize,
        extension_count: usize,
    },
    PhaseStarted {
        run_id: String,
        phase: String,
        helper_count: usize,
    },
    HelperStarted {
        run_id: String,
        helper_id: String,
        key: String,
        kind: String,
    },
    HelperCompleted {
        run_id: String,
        helper_id: String,
        key: String,
        duration_ms: u64,
    },
    PhaseCompleted {
        run_id: String,
        phase: String,
        executed: usize,
    },
    ExtensionApplied {
        run_id: String,
        key: String,
        replaced_artifact: bool,
    },
    ExtensionsCommitted {
        run_id: String,
        count: usize,
    },
    ExtensionsRolledBack {
        run_id: String,
        count: usize,
        error: String,
    },
    RunCompleted {
        run_id: String,
        steps: usize,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::PhaseStarted { run_id, .. }
            | PipelineEvent::HelperStarted { run_id, .. }
            | PipelineEvent::HelperCompleted { run_id, .. }
            | PipelineEvent::PhaseCompleted { run_id, .. }
            | PipelineEvent::ExtensionApplied { run_id, .. }
            | PipelineEvent::ExtensionsCommitted { run_id, .. }
            | PipelineEvent::ExtensionsRolledBack { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. }
            | PipelineEvent::RunFailed { run_id, .. } => run_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::RunStarted {
            run_id: "r1".into(),
            fragment_count: 3,
            builder_count: 1,
            extension_count: 0,
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::RunStarted {
                run_id,
                fragment_count,
                ..
            } => {
                assert_eq!(run_id, "r1");
                assert_eq!(fragment_count, 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(PipelineEvent::ExtensionsCommitted {
            run_id: "r1".into(),
            count: 2,
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::RunFailed {
            run_id: "r1".into(),
            error: "something went wrong".into(),
        });
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let emitter = EventEmitter::new(0);
        emitter.emit(PipelineEvent::RunFailed {
            run_id: "r1".into(),
            error: "x".into(),
        });
    }

    #[test]
    fn run_id_is_reachable_from_every_variant() {
        let event = PipelineEvent::HelperCompleted {
            run_id: "abc".into(),
            helper_id: "fragment:meta#0".into(),
            key: "meta".into(),
            duration_ms: 4,
        };
        assert_eq!(event.run_id(), "abc");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["HelperCompleted"]["helper_id"], "fragment:meta#0");
    }
}
