//! Structured, non-fatal findings about the helper graph.
//!
//! Diagnostics never stand in for an error. When a run fails structurally the
//! diagnostics explain why; they are only handed back on a successful run.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::helper::{HelperDescriptor, HelperKind, HelperMode};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PipelineDiagnostic {
    /// A second `override` helper was registered for a key.
    Conflict {
        key: String,
        mode: HelperMode,
        /// Labels of the new helper and the one it collided with.
        helpers: Vec<String>,
        message: String,
        kind: Option<HelperKind>,
    },
    MissingDependency {
        key: String,
        dependency_key: String,
        message: String,
        kind: Option<HelperKind>,
        helper: Option<String>,
    },
    UnusedHelper {
        key: String,
        message: String,
        kind: Option<HelperKind>,
        helper: Option<String>,
        depends_on: Vec<String>,
    },
}

/// Why a registered helper did not execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnusedReason {
    NeverExecuted,
    MissingDependency(String),
    UnresolvedChain,
    DependencyNotExecuted(String),
}

impl fmt::Display for UnusedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnusedReason::NeverExecuted => f.write_str("registered but never executed"),
            UnusedReason::MissingDependency(dep) => {
                write!(f, "could not execute, dependency \"{dep}\" not found")
            }
            UnusedReason::UnresolvedChain => {
                f.write_str("could not execute, dependency chain never resolved")
            }
            UnusedReason::DependencyNotExecuted(dep) => {
                write!(f, "could not execute, dependency \"{dep}\" never executed")
            }
        }
    }
}

impl PipelineDiagnostic {
    pub fn conflict(helper: &HelperDescriptor, existing: &HelperDescriptor) -> Self {
        PipelineDiagnostic::Conflict {
            key: helper.key.clone(),
            mode: helper.mode,
            helpers: vec![existing.label().to_string(), helper.label().to_string()],
            message: format!(
                "Helper \"{}\" is already registered with mode \"override\" for kind \"{}\".",
                helper.key, helper.kind
            ),
            kind: Some(helper.kind.clone()),
        }
    }

    pub fn missing_dependency(helper: &HelperDescriptor, dependency_key: &str) -> Self {
        PipelineDiagnostic::MissingDependency {
            key: helper.key.clone(),
            dependency_key: dependency_key.to_string(),
            message: format!(
                "Helper \"{}\" depends on unknown helper \"{}\".",
                helper.key, dependency_key
            ),
            kind: Some(helper.kind.clone()),
            helper: Some(helper.label().to_string()),
        }
    }

    pub fn unused_helper(helper: &HelperDescriptor, reason: &UnusedReason) -> Self {
        PipelineDiagnostic::UnusedHelper {
            key: helper.key.clone(),
            message: format!("Helper \"{}\" {}.", helper.key, reason),
            kind: Some(helper.kind.clone()),
            helper: Some(helper.label().to_string()),
            depends_on: helper.depends_on.clone(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            PipelineDiagnostic::Conflict { key, .. }
            | PipelineDiagnostic::MissingDependency { key, .. }
            | PipelineDiagnostic::UnusedHelper { key, .. } => key,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PipelineDiagnostic::Conflict { message, .. }
            | PipelineDiagnostic::MissingDependency { message, .. }
            | PipelineDiagnostic::UnusedHelper { message, .. } => message,
        }
    }

    /// The `type` tag as it appears in serialized form.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineDiagnostic::Conflict { .. } => "conflict",
            PipelineDiagnostic::MissingDependency { .. } => "missing-dependency",
            PipelineDiagnostic::UnusedHelper { .. } => "unused-helper",
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Append-only diagnostic list owned by one pipeline.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    items: Mutex<Vec<PipelineDiagnostic>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, diagnostic: PipelineDiagnostic) {
        tracing::debug!(kind = diagnostic.type_name(), key = diagnostic.key(), "{}", diagnostic.message());
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }

    pub fn extend(&self, diagnostics: impl IntoIterator<Item = PipelineDiagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn snapshot(&self) -> Vec<PipelineDiagnostic> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
