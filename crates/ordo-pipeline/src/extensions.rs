//! Extension hooks that run between the fragment and builder phases.
//!
//! A hook sees the finalized artifact, may replace it, and may hand back
//! commit and rollback tasks. Commits run forward once the builder phase has
//! succeeded. Rollbacks run last-to-first when anything after the hook fails.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::future::BoxFuture;

use ordo_types::{OrdoError, Result};

use crate::definition::{
    ExtensionHookOptions, ExtensionRollbackFailure, PipelineDefinition, RunScope,
};
use crate::engine::Pipeline;
use crate::events::{EventEmitter, PipelineEvent};
use crate::transaction::{pipeline_task, PipelineTask};

// ---------------------------------------------------------------------------
// Hook contract
// ---------------------------------------------------------------------------

/// Outcome of one hook invocation. Every field is optional.
pub struct ExtensionHookResult<A> {
    /// Replaces the artifact for later hooks and the builder phase.
    pub artifact: Option<A>,
    pub commit: Option<PipelineTask>,
    pub rollback: Option<PipelineTask>,
}

impl<A> Default for ExtensionHookResult<A> {
    fn default() -> Self {
        Self {
            artifact: None,
            commit: None,
            rollback: None,
        }
    }
}

impl<A> ExtensionHookResult<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, artifact: A) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_commit<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.commit = Some(pipeline_task(f));
        self
    }

    pub fn with_rollback<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.rollback = Some(pipeline_task(f));
        self
    }
}

impl<A> fmt::Debug for ExtensionHookResult<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionHookResult")
            .field("artifact", &self.artifact.is_some())
            .field("commit", &self.commit.is_some())
            .field("rollback", &self.rollback.is_some())
            .finish()
    }
}

#[async_trait]
pub trait ExtensionHook<D: PipelineDefinition>: Send + Sync {
    async fn apply(
        &self,
        options: ExtensionHookOptions<'_, D>,
    ) -> Result<Option<ExtensionHookResult<D::Artifact>>>;
}

pub type DynExtensionHook<D> = Arc<dyn ExtensionHook<D>>;

/// What [`PipelineExtension::register`] produced.
pub enum ExtensionRegistration<D: PipelineDefinition> {
    None,
    Hook(DynExtensionHook<D>),
    /// A hook that only becomes available once the future resolves.
    Pending(BoxFuture<'static, Result<Option<DynExtensionHook<D>>>>),
}

impl<D: PipelineDefinition> ExtensionRegistration<D> {
    pub fn hook(hook: impl ExtensionHook<D> + 'static) -> Self {
        ExtensionRegistration::Hook(Arc::new(hook))
    }

    pub fn pending<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<Option<DynExtensionHook<D>>>> + Send + 'static,
    {
        ExtensionRegistration::Pending(Box::pin(future))
    }

    /// Settle into the hook, if any.
    pub async fn resolve(self) -> Result<Option<DynExtensionHook<D>>> {
        match self {
            ExtensionRegistration::None => Ok(None),
            ExtensionRegistration::Hook(hook) => Ok(Some(hook)),
            ExtensionRegistration::Pending(future) => future.await,
        }
    }
}

/// A plug-in that may add helpers and contribute one hook.
pub trait PipelineExtension<D: PipelineDefinition>: Send + Sync {
    /// Key used in rollback reports. Defaults to `pipeline.extension#N`.
    fn key(&self) -> Option<&str> {
        None
    }

    fn register(&self, pipeline: &mut Pipeline<D>) -> Result<ExtensionRegistration<D>>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct RegisteredHook<D: PipelineDefinition> {
    pub key: String,
    pub hook: DynExtensionHook<D>,
}

pub struct ExtensionRegistry<D: PipelineDefinition> {
    hooks: Vec<RegisteredHook<D>>,
}

impl<D: PipelineDefinition> Default for ExtensionRegistry<D> {
    fn default() -> Self {
        Self { hooks: Vec::new() }
    }
}

impl<D: PipelineDefinition> ExtensionRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: Option<&str>, hook: DynExtensionHook<D>) -> &RegisteredHook<D> {
        let key = match key {
            Some(key) => key.to_string(),
            None => format!("pipeline.extension#{}", self.hooks.len() + 1),
        };
        tracing::debug!(extension = %key, "Registered extension hook");
        let index = self.hooks.len();
        self.hooks.push(RegisteredHook { key, hook });
        &self.hooks[index]
    }

    pub fn hooks(&self) -> &[RegisteredHook<D>] {
        &self.hooks
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|h| h.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Run-time application
// ---------------------------------------------------------------------------

pub(crate) struct AppliedHook {
    pub(crate) key: String,
    commit: Option<PipelineTask>,
    rollback: Option<PipelineTask>,
}

pub(crate) struct HookRun<A> {
    pub(crate) artifact: A,
    pub(crate) applied: Vec<AppliedHook>,
    pub(crate) sequence: Vec<String>,
}

/// Where the hook phase reports to.
pub(crate) struct HookSink<'a> {
    pub(crate) events: &'a EventEmitter,
    pub(crate) run_id: &'a str,
}

/// Thread the artifact through every hook in registration order.
///
/// When a hook fails, results gathered so far are rolled back before the
/// error is returned.
pub(crate) async fn run_extension_hooks<D: PipelineDefinition>(
    definition: &D,
    registry: &ExtensionRegistry<D>,
    scope: RunScope<'_, D>,
    mut artifact: D::Artifact,
    sink: &HookSink<'_>,
) -> Result<HookRun<D::Artifact>> {
    let mut applied = Vec::new();
    let mut sequence = Vec::with_capacity(registry.len());

    for registered in registry.hooks() {
        sequence.push(registered.key.clone());
        let options = definition.create_extension_hook_options(scope, &artifact);
        let outcome = registered.hook.apply(options).await;

        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                tracing::debug!(extension = %registered.key, error = %error, "Extension hook failed");
                rollback_extensions(definition, &mut applied, &sequence, scope.context, &error).await;
                sink.events.emit(PipelineEvent::ExtensionsRolledBack {
                    run_id: sink.run_id.to_string(),
                    count: applied.len(),
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        let mut replaced = false;
        if let Some(result) = result {
            if let Some(next) = result.artifact {
                artifact = next;
                replaced = true;
            }
            applied.push(AppliedHook {
                key: registered.key.clone(),
                commit: result.commit,
                rollback: result.rollback,
            });
        }

        sink.events.emit(PipelineEvent::ExtensionApplied {
            run_id: sink.run_id.to_string(),
            key: registered.key.clone(),
            replaced_artifact: replaced,
        });
    }

    Ok(HookRun {
        artifact,
        applied,
        sequence,
    })
}

/// Run every pending commit in registration order, each at most once.
pub(crate) async fn commit_extensions(applied: &mut [AppliedHook]) -> Result<()> {
    for hook in applied.iter_mut() {
        if let Some(commit) = hook.commit.take() {
            tracing::debug!(extension = %hook.key, "Committing extension");
            commit().await?;
        }
    }
    Ok(())
}

/// Run every pending rollback last-to-first.
///
/// Rollback errors go to the definition's handler and never replace `cause`.
pub(crate) async fn rollback_extensions<D: PipelineDefinition>(
    definition: &D,
    applied: &mut [AppliedHook],
    sequence: &[String],
    context: &D::Context,
    cause: &OrdoError,
) {
    let keys: Vec<String> = applied.iter().map(|h| h.key.clone()).collect();

    for hook in applied.iter_mut().rev() {
        let Some(rollback) = hook.rollback.take() else {
            continue;
        };
        tracing::debug!(extension = %hook.key, "Rolling back extension");
        if let Err(error) = rollback().await {
            tracing::debug!(extension = %hook.key, error = %error, "Extension rollback failed");
            definition.on_extension_rollback_error(
                ExtensionRollbackFailure {
                    error: &error,
                    cause,
                    extension_key: &hook.key,
                    extension_keys: &keys,
                    hook_sequence: sequence,
                },
                context,
            );
        }
    }
}
