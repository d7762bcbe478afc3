//! Sequential phase executor with middleware-style continuations.
//!
//! Every helper receives a [`Next`] handle. Calling it runs the remainder of
//! the phase before returning control to the helper, which lets a helper wrap
//! the rest of the chain. A helper that never calls it is followed
//! automatically once its own work settles. Either way each remaining helper
//! runs exactly once.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};

use ordo_types::Result;

use crate::events::{EventEmitter, PipelineEvent};
use crate::helper::{HelperDescriptor, HelperKind, HelperMode};
use crate::registry::RegisteredEntry;

// ---------------------------------------------------------------------------
// PipelineStep
// ---------------------------------------------------------------------------

/// Log record of one executed helper, appended in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: String,
    pub index: usize,
    pub key: String,
    pub kind: HelperKind,
    pub mode: HelperMode,
    pub priority: i32,
    pub depends_on: Vec<String>,
    pub origin: Option<String>,
}

impl PipelineStep {
    /// `index` is the step's position in the run's combined step log.
    pub(crate) fn from_entry<A: Send + 'static>(entry: &RegisteredEntry<A>, index: usize) -> Self {
        let descriptor = entry.descriptor();
        Self {
            id: entry.id.clone(),
            index,
            key: descriptor.key.clone(),
            kind: descriptor.kind.clone(),
            mode: descriptor.mode,
            priority: descriptor.priority,
            depends_on: descriptor.depends_on.clone(),
            origin: descriptor.origin.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Next: the continuation handle
// ---------------------------------------------------------------------------

pub(crate) trait Chain: Send + Sync {
    fn run_from(&self, index: usize) -> BoxFuture<'_, Result<()>>;
}

/// Continuation that runs the rest of the current phase.
///
/// Only the first call advances the chain; later calls return `Ok(())`
/// without doing anything.
pub struct Next<'a> {
    chain: Option<&'a dyn Chain>,
    index: usize,
    called: AtomicBool,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a dyn Chain, index: usize) -> Self {
        Self {
            chain: Some(chain),
            index,
            called: AtomicBool::new(false),
        }
    }

    /// A continuation with nothing behind it, for driving a helper on its own.
    pub fn detached() -> Next<'static> {
        Next {
            chain: None,
            index: 0,
            called: AtomicBool::new(false),
        }
    }

    pub async fn run(&self) -> Result<()> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.chain {
            Some(chain) => chain.run_from(self.index).await,
            None => Ok(()),
        }
    }

    pub fn was_called(&self) -> bool {
        self.called.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("called", &self.was_called())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PhaseExecutor
// ---------------------------------------------------------------------------

pub(crate) type ArgsFactory<'a, A> = dyn Fn(&HelperDescriptor) -> A + Send + Sync + 'a;

pub(crate) struct PhaseExecutor<'a, A: Send + 'static> {
    entries: &'a [&'a RegisteredEntry<A>],
    make_args: &'a ArgsFactory<'a, A>,
    steps: &'a Mutex<Vec<PipelineStep>>,
    events: &'a EventEmitter,
    run_id: &'a str,
    visited: Mutex<HashSet<String>>,
}

impl<'a, A: Send + 'static> PhaseExecutor<'a, A> {
    pub(crate) fn new(
        entries: &'a [&'a RegisteredEntry<A>],
        make_args: &'a ArgsFactory<'a, A>,
        steps: &'a Mutex<Vec<PipelineStep>>,
        events: &'a EventEmitter,
        run_id: &'a str,
    ) -> Self {
        Self {
            entries,
            make_args,
            steps,
            events,
            run_id,
            visited: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) async fn execute(&self) -> Result<()> {
        self.run_at(0).await
    }

    /// Ids of every entry that started executing.
    pub(crate) fn into_visited(self) -> HashSet<String> {
        self.visited
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_visited(&self, id: &str) -> bool {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string())
    }

    fn record_step(&self, entry: &RegisteredEntry<A>) {
        let mut steps = self.steps.lock().unwrap_or_else(PoisonError::into_inner);
        let index = steps.len();
        steps.push(PipelineStep::from_entry(entry, index));
    }

    fn run_at(&self, index: usize) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(entry) = self.entries.get(index).copied() else {
                return Ok(());
            };
            if !self.mark_visited(&entry.id) {
                return Ok(());
            }
            self.record_step(entry);

            let descriptor = entry.descriptor();
            tracing::debug!(helper = %entry.id, kind = %descriptor.kind, "Applying helper");
            self.events.emit(PipelineEvent::HelperStarted {
                run_id: self.run_id.to_string(),
                helper_id: entry.id.clone(),
                key: descriptor.key.clone(),
                kind: descriptor.kind.to_string(),
            });
            let started = Instant::now();

            let args = (self.make_args)(descriptor);
            let next = Next::new(self, index + 1);
            if let Err(error) = entry.helper.apply(args, &next).await {
                tracing::debug!(helper = %entry.id, error = %error, "Helper failed");
                return Err(error);
            }

            self.events.emit(PipelineEvent::HelperCompleted {
                run_id: self.run_id.to_string(),
                helper_id: entry.id.clone(),
                key: descriptor.key.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            });

            if !next.was_called() {
                self.run_at(index + 1).await?;
            }
            Ok(())
        })
    }
}

impl<A: Send + 'static> Chain for PhaseExecutor<'_, A> {
    fn run_from(&self, index: usize) -> BoxFuture<'_, Result<()>> {
        self.run_at(index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
