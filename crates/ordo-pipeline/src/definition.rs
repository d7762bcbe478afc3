//! The contract a domain implements to specialize the engine.
//!
//! Required methods build the per-run state (build options, context, draft,
//! artifact) and the arguments each helper receives. Provided methods are
//! overridable hooks with sensible defaults.

use ordo_types::{OrdoError, PipelineContext, Result};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{PipelineDiagnostic, UnusedReason};
use crate::executor::PipelineStep;
use crate::helper::HelperDescriptor;

// ---------------------------------------------------------------------------
// Run scope and result
// ---------------------------------------------------------------------------

/// Borrowed view of the state built at the start of a run.
pub struct RunScope<'a, D: PipelineDefinition> {
    pub options: &'a D::RunOptions,
    pub build_options: &'a D::BuildOptions,
    pub context: &'a D::Context,
}

impl<D: PipelineDefinition> Clone for RunScope<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: PipelineDefinition> Copy for RunScope<'_, D> {}

/// What a successful run hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunState<T> {
    pub artifact: T,
    pub diagnostics: Vec<PipelineDiagnostic>,
    /// Fragment steps followed by builder steps, in execution order.
    pub steps: Vec<PipelineStep>,
}

/// Input passed to every extension hook.
pub struct ExtensionHookOptions<'a, D: PipelineDefinition> {
    pub context: &'a D::Context,
    pub options: &'a D::RunOptions,
    pub build_options: &'a D::BuildOptions,
    pub artifact: &'a D::Artifact,
}

/// Details of a rollback callback that failed.
#[derive(Debug)]
pub struct ExtensionRollbackFailure<'a> {
    pub error: &'a OrdoError,
    /// The error that triggered the rollback.
    pub cause: &'a OrdoError,
    pub extension_key: &'a str,
    /// Keys of every hook whose result was being rolled back.
    pub extension_keys: &'a [String],
    /// Keys of every hook invoked this run, in invocation order.
    pub hook_sequence: &'a [String],
}

impl ExtensionRollbackFailure<'_> {
    pub fn to_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error.to_string(),
            "cause": self.cause.to_string(),
            "extensionKey": self.extension_key,
            "extensionKeys": self.extension_keys,
            "hookSequence": self.hook_sequence,
        })
    }
}

// ---------------------------------------------------------------------------
// PipelineDefinition
// ---------------------------------------------------------------------------

pub trait PipelineDefinition: Send + Sync + Sized + 'static {
    type RunOptions: Send + Sync;
    type BuildOptions: Send + Sync;
    type Context: PipelineContext;
    /// Mutable fragment-phase state. Helpers mutate it through whatever
    /// shared handle the args carry.
    type Draft: Send + Sync;
    type Artifact: Send + Sync;
    type FragmentArgs: Send + 'static;
    type BuilderArgs: Send + 'static;

    fn create_build_options(&self, options: &Self::RunOptions) -> Result<Self::BuildOptions>;

    fn create_context(&self, options: &Self::RunOptions) -> Result<Self::Context>;

    fn create_fragment_state(&self, scope: RunScope<'_, Self>) -> Result<Self::Draft>;

    fn create_fragment_args(
        &self,
        helper: &HelperDescriptor,
        scope: RunScope<'_, Self>,
        draft: &Self::Draft,
    ) -> Self::FragmentArgs;

    /// Freeze the draft. `helpers` lists the executed fragment helpers in order.
    fn finalize_fragment_state(
        &self,
        draft: Self::Draft,
        scope: RunScope<'_, Self>,
        helpers: &[&HelperDescriptor],
    ) -> Result<Self::Artifact>;

    fn create_builder_args(
        &self,
        helper: &HelperDescriptor,
        scope: RunScope<'_, Self>,
        artifact: &Self::Artifact,
    ) -> Self::BuilderArgs;

    // --- Provided hooks ---

    fn create_run_result(
        &self,
        state: PipelineRunState<Self::Artifact>,
        _scope: RunScope<'_, Self>,
    ) -> Result<PipelineRunState<Self::Artifact>> {
        Ok(state)
    }

    fn create_extension_hook_options<'a>(
        &self,
        scope: RunScope<'a, Self>,
        artifact: &'a Self::Artifact,
    ) -> ExtensionHookOptions<'a, Self> {
        ExtensionHookOptions {
            context: scope.context,
            options: scope.options,
            build_options: scope.build_options,
            artifact,
        }
    }

    fn on_extension_rollback_error(
        &self,
        failure: ExtensionRollbackFailure<'_>,
        context: &Self::Context,
    ) {
        context
            .reporter()
            .warn("Pipeline extension rollback failed.", Some(&failure.to_fields()));
    }

    fn create_conflict_diagnostic(
        &self,
        helper: &HelperDescriptor,
        existing: &HelperDescriptor,
    ) -> PipelineDiagnostic {
        PipelineDiagnostic::conflict(helper, existing)
    }

    fn create_missing_dependency_diagnostic(
        &self,
        helper: &HelperDescriptor,
        dependency_key: &str,
    ) -> PipelineDiagnostic {
        PipelineDiagnostic::missing_dependency(helper, dependency_key)
    }

    fn create_unused_helper_diagnostic(
        &self,
        helper: &HelperDescriptor,
        reason: &UnusedReason,
    ) -> PipelineDiagnostic {
        PipelineDiagnostic::unused_helper(helper, reason)
    }
}
