//! Helper pipeline orchestration.
//!
//! Independently authored helpers are composed into two ordered phases:
//! fragment helpers build up a draft, builder helpers consume the finalized
//! artifact. Between the phases, extension hooks may replace the artifact and
//! register commit/rollback tasks. Ordering is a deterministic topological
//! sort over declared dependency keys, and each helper receives a
//! continuation to run the rest of its phase.

pub mod definition;
pub mod dependency;
pub mod diagnostics;
pub mod engine;
pub mod events;
pub mod executor;
pub mod extensions;
pub mod helper;
pub mod registry;
pub mod transaction;

pub use definition::{
    ExtensionHookOptions, ExtensionRollbackFailure, PipelineDefinition, PipelineRunState, RunScope,
};
pub use dependency::{build_dependency_graph, DependencyGraph, GraphError, MissingDependency};
pub use diagnostics::{DiagnosticCollector, PipelineDiagnostic, UnusedReason};
pub use engine::{Pipeline, PipelineHelper, PipelineOptions};
pub use events::{EventEmitter, PipelineEvent};
pub use executor::{Next, PipelineStep};
pub use extensions::{
    DynExtensionHook, ExtensionHook, ExtensionHookResult, ExtensionRegistration,
    ExtensionRegistry, PipelineExtension, RegisteredHook,
};
pub use helper::{
    create_helper, helper_fn, Helper, HelperApply, HelperBuilder, HelperDescriptor, HelperFn,
    HelperKind, HelperMode, HelperOptions,
};
pub use registry::{HelperRegistry, RegisteredEntry, RegistrationError};
pub use transaction::{
    create_pipeline_commit, create_pipeline_rollback, pipeline_task, PipelineTask,
};
