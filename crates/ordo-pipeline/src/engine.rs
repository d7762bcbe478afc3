//! The `Pipeline` entry point: registration plus the single-pass `run` lifecycle.
//!
//! A run goes build options, context, draft, fragment graph, fragment phase,
//! finalize, builder graph, extension hooks, builder phase, commit. Any
//! failure after the hooks ran rolls them back before the error surfaces.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use ordo_types::{OrdoError, Result};

use crate::definition::{PipelineDefinition, PipelineRunState, RunScope};
use crate::dependency::{build_dependency_graph, GraphError};
use crate::diagnostics::{DiagnosticCollector, PipelineDiagnostic, UnusedReason};
use crate::events::{EventEmitter, PipelineEvent};
use crate::executor::{ArgsFactory, PhaseExecutor, PipelineStep};
use crate::extensions::{
    commit_extensions, rollback_extensions, run_extension_hooks, ExtensionRegistry, HookRun,
    HookSink, PipelineExtension,
};
use crate::helper::{Helper, HelperDescriptor, HelperKind};
use crate::registry::{HelperRegistry, RegisteredEntry, RegistrationError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Construction-time settings for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub fragment_kind: HelperKind,
    pub builder_kind: HelperKind,
    pub event_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fragment_kind: HelperKind::Fragment,
            builder_kind: HelperKind::Builder,
            event_capacity: 256,
        }
    }
}

/// A helper of either phase, for [`Pipeline::use_helper`].
pub enum PipelineHelper<D: PipelineDefinition> {
    Fragment(Helper<D::FragmentArgs>),
    Builder(Helper<D::BuilderArgs>),
}

/// Owns the registries, diagnostics and hooks for one domain.
pub struct Pipeline<D: PipelineDefinition> {
    definition: D,
    fragments: HelperRegistry<D::FragmentArgs>,
    builders: HelperRegistry<D::BuilderArgs>,
    extensions: ExtensionRegistry<D>,
    diagnostics: DiagnosticCollector,
    events: EventEmitter,
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

fn register_helper<D, A>(
    definition: &D,
    registry: &mut HelperRegistry<A>,
    diagnostics: &DiagnosticCollector,
    helper: Helper<A>,
) -> Result<()>
where
    D: PipelineDefinition,
    A: Send + 'static,
{
    let error = match registry.register(helper) {
        Ok(entry) => {
            tracing::debug!(helper = %entry.id, "Registered helper");
            return Ok(());
        }
        Err(error) => error,
    };

    if let RegistrationError::OverrideConflict {
        helper, existing, ..
    } = &error
    {
        diagnostics.push(definition.create_conflict_diagnostic(helper, existing));
    }
    Err(OrdoError::ValidationError(error.to_string()))
}

impl<D: PipelineDefinition> Pipeline<D> {
    pub fn new(definition: D) -> Self {
        Self::with_options(definition, PipelineOptions::default())
    }

    pub fn with_options(definition: D, options: PipelineOptions) -> Self {
        Self {
            definition,
            fragments: HelperRegistry::new(options.fragment_kind),
            builders: HelperRegistry::new(options.builder_kind),
            extensions: ExtensionRegistry::new(),
            diagnostics: DiagnosticCollector::new(),
            events: EventEmitter::new(options.event_capacity),
        }
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn fragments(&self) -> &HelperRegistry<D::FragmentArgs> {
        &self.fragments
    }

    pub fn builders(&self) -> &HelperRegistry<D::BuilderArgs> {
        &self.builders
    }

    pub fn extensions(&self) -> &ExtensionRegistry<D> {
        &self.extensions
    }

    /// Every diagnostic recorded so far, including those from failed runs.
    pub fn diagnostics(&self) -> Vec<PipelineDiagnostic> {
        self.diagnostics.snapshot()
    }

    pub fn use_fragment(&mut self, helper: Helper<D::FragmentArgs>) -> Result<()> {
        register_helper(&self.definition, &mut self.fragments, &self.diagnostics, helper)
    }

    pub fn use_builder(&mut self, helper: Helper<D::BuilderArgs>) -> Result<()> {
        register_helper(&self.definition, &mut self.builders, &self.diagnostics, helper)
    }

    pub fn use_helper(&mut self, helper: PipelineHelper<D>) -> Result<()> {
        match helper {
            PipelineHelper::Fragment(helper) => self.use_fragment(helper),
            PipelineHelper::Builder(helper) => self.use_builder(helper),
        }
    }

    /// Let `extension` register helpers and contribute its hook.
    ///
    /// A pending registration is awaited here, so the hook is in place once
    /// this returns.
    pub async fn use_extension<E: PipelineExtension<D>>(&mut self, extension: E) -> Result<()> {
        let registration = extension.register(self)?;
        if let Some(hook) = registration.resolve().await? {
            self.extensions.register(extension.key(), hook);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Execute both phases once and assemble the run state.
    ///
    /// Diagnostics from graph building and exhaustiveness checks are appended
    /// to the pipeline's collector on every call, so repeated runs of a
    /// misconfigured pipeline accumulate duplicates.
    pub async fn run(&self, options: D::RunOptions) -> Result<PipelineRunState<D::Artifact>> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        tracing::info!(
            run_id = %run_id,
            fragments = self.fragments.len(),
            builders = self.builders.len(),
            extensions = self.extensions.len(),
            "Pipeline run started"
        );
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            fragment_count: self.fragments.len(),
            builder_count: self.builders.len(),
            extension_count: self.extensions.len(),
        });

        match self.run_once(&run_id, options).await {
            Ok(state) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(run_id = %run_id, steps = state.steps.len(), duration_ms, "Pipeline run completed");
                self.events.emit(PipelineEvent::RunCompleted {
                    run_id,
                    steps: state.steps.len(),
                    duration_ms,
                });
                Ok(state)
            }
            Err(error) => {
                tracing::info!(run_id = %run_id, error = %error, "Pipeline run failed");
                self.events.emit(PipelineEvent::RunFailed {
                    run_id,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn run_once(
        &self,
        run_id: &str,
        options: D::RunOptions,
    ) -> Result<PipelineRunState<D::Artifact>> {
        let build_options = self.definition.create_build_options(&options)?;
        let context = self.definition.create_context(&options)?;
        let scope: RunScope<'_, D> = RunScope {
            options: &options,
            build_options: &build_options,
            context: &context,
        };
        let steps = Mutex::new(Vec::new());

        // Fragment phase
        let draft = self.definition.create_fragment_state(scope)?;
        let fragment_order = self.resolve_order(&self.fragments)?;
        let visited = {
            let make_args = |helper: &HelperDescriptor| {
                self.definition.create_fragment_args(helper, scope, &draft)
            };
            self.execute_phase(&self.fragments, &fragment_order, &make_args, &steps, run_id)
                .await?
        };
        self.ensure_executed(&self.fragments, &visited)?;

        let executed: Vec<&HelperDescriptor> =
            fragment_order.iter().map(|entry| entry.descriptor()).collect();
        let artifact = self
            .definition
            .finalize_fragment_state(draft, scope, &executed)?;

        // Extension hooks, then the builder phase
        let builder_order = self.resolve_order(&self.builders)?;
        let sink = HookSink {
            events: &self.events,
            run_id,
        };
        let HookRun {
            artifact,
            mut applied,
            sequence,
        } = run_extension_hooks(&self.definition, &self.extensions, scope, artifact, &sink).await?;

        let outcome: Result<()> = async {
            let visited = {
                let make_args = |helper: &HelperDescriptor| {
                    self.definition.create_builder_args(helper, scope, &artifact)
                };
                self.execute_phase(&self.builders, &builder_order, &make_args, &steps, run_id)
                    .await?
            };
            self.ensure_executed(&self.builders, &visited)?;
            commit_extensions(&mut applied).await
        }
        .await;

        if let Err(error) = outcome {
            rollback_extensions(&self.definition, &mut applied, &sequence, &context, &error).await;
            if !applied.is_empty() {
                self.events.emit(PipelineEvent::ExtensionsRolledBack {
                    run_id: run_id.to_string(),
                    count: applied.len(),
                    error: error.to_string(),
                });
            }
            return Err(error);
        }
        if !applied.is_empty() {
            self.events.emit(PipelineEvent::ExtensionsCommitted {
                run_id: run_id.to_string(),
                count: applied.len(),
            });
        }

        let state = PipelineRunState {
            artifact,
            diagnostics: self.diagnostics.snapshot(),
            steps: steps.into_inner().unwrap_or_else(PoisonError::into_inner),
        };
        self.definition.create_run_result(state, scope)
    }

    async fn execute_phase<A: Send + 'static>(
        &self,
        registry: &HelperRegistry<A>,
        order: &[&RegisteredEntry<A>],
        make_args: &ArgsFactory<'_, A>,
        steps: &Mutex<Vec<PipelineStep>>,
        run_id: &str,
    ) -> Result<HashSet<String>> {
        let phase = registry.kind().to_string();
        tracing::info!(phase = %phase, helpers = order.len(), "Executing phase");
        self.events.emit(PipelineEvent::PhaseStarted {
            run_id: run_id.to_string(),
            phase: phase.clone(),
            helper_count: order.len(),
        });

        let executor = PhaseExecutor::new(order, make_args, steps, &self.events, run_id);
        executor.execute().await?;
        let visited = executor.into_visited();

        self.events.emit(PipelineEvent::PhaseCompleted {
            run_id: run_id.to_string(),
            phase,
            executed: visited.len(),
        });
        Ok(visited)
    }

    /// Build the dependency graph for one registry and return its execution order.
    fn resolve_order<'r, A: Send + 'static>(
        &self,
        registry: &'r HelperRegistry<A>,
    ) -> Result<Vec<&'r RegisteredEntry<A>>> {
        let entries = registry.entries();
        let descriptors: Vec<&HelperDescriptor> =
            entries.iter().map(|entry| entry.descriptor()).collect();

        match build_dependency_graph(&descriptors) {
            Ok(graph) => Ok(graph.order.iter().map(|&p| &entries[p]).collect()),
            Err(GraphError::Missing(issues)) => {
                self.diagnostics.extend(issues.iter().map(|issue| {
                    self.definition
                        .create_missing_dependency_diagnostic(descriptors[issue.entry], &issue.dependency)
                }));
                let mut reported = HashSet::new();
                self.diagnostics.extend(
                    issues
                        .iter()
                        .filter(|issue| reported.insert(issue.entry))
                        .map(|issue| {
                            let reason = UnusedReason::MissingDependency(issue.dependency.clone());
                            self.definition
                                .create_unused_helper_diagnostic(descriptors[issue.entry], &reason)
                        }),
                );
                let message = match issues.first() {
                    Some(issue) => format!(
                        "Helper \"{}\" depends on unknown helper \"{}\".",
                        descriptors[issue.entry].key, issue.dependency
                    ),
                    None => "Helper depends on an unknown helper.".to_string(),
                };
                Err(OrdoError::ValidationError(message))
            }
            Err(GraphError::Unresolved(positions)) => {
                self.diagnostics.extend(positions.iter().map(|&position| {
                    self.definition
                        .create_unused_helper_diagnostic(descriptors[position], &UnusedReason::UnresolvedChain)
                }));
                let keys: Vec<&str> = positions
                    .iter()
                    .map(|&p| descriptors[p].key.as_str())
                    .collect();
                Err(OrdoError::ValidationError(format!(
                    "Detected unresolved pipeline helpers: {}.",
                    keys.join(", ")
                )))
            }
        }
    }

    /// Fail when any registered entry did not execute, explaining each one.
    fn ensure_executed<A: Send + 'static>(
        &self,
        registry: &HelperRegistry<A>,
        visited: &HashSet<String>,
    ) -> Result<()> {
        let skipped: Vec<&RegisteredEntry<A>> = registry
            .entries()
            .iter()
            .filter(|entry| !visited.contains(&entry.id))
            .collect();
        if skipped.is_empty() {
            return Ok(());
        }

        let skipped_keys: HashSet<&str> = skipped.iter().map(|entry| entry.key()).collect();
        for entry in &skipped {
            let descriptor = entry.descriptor();
            let reason = descriptor
                .depends_on
                .iter()
                .find(|dep| skipped_keys.contains(dep.as_str()))
                .map(|dep| UnusedReason::DependencyNotExecuted(dep.clone()))
                .unwrap_or(UnusedReason::NeverExecuted);
            self.diagnostics
                .push(self.definition.create_unused_helper_diagnostic(descriptor, &reason));
        }

        let keys: Vec<&str> = skipped.iter().map(|entry| entry.key()).collect();
        Err(OrdoError::ValidationError(format!(
            "Pipeline finished with unexecuted {} helpers: {}.",
            registry.kind(),
            keys.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
