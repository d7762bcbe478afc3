//! Shared types for the Ordo helper pipeline.
//!
//! This crate provides the foundational pieces used by the engine and its callers:
//! - `OrdoError`: unified error taxonomy
//! - `Reporter`: logger-like capability handed to helpers through the context
//! - `PipelineContext`: contract every domain context implements

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Unified error type for the pipeline engine and the helpers it runs.
#[derive(Debug, thiserror::Error)]
pub enum OrdoError {
    // === Structural Errors ===
    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    // === Runtime Errors ===
    #[error("Helper '{key}' failed: {message}")]
    HelperFailed { key: String, message: String },

    #[error("Extension '{key}' failed: {message}")]
    ExtensionFailed { key: String, message: String },

    #[error(transparent)]
    Source(Box<dyn std::error::Error + Send + Sync>),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl OrdoError {
    /// Wrap an arbitrary collaborator error without losing its source chain.
    pub fn from_source(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        OrdoError::Source(Box::new(error))
    }

    /// Returns `true` for configuration errors in the helper graph.
    ///
    /// Structural errors are never retried and always abort a run.
    pub fn is_structural(&self) -> bool {
        matches!(self, OrdoError::ValidationError(_))
    }
}

/// A convenience alias for `Result<T, OrdoError>`.
pub type Result<T> = std::result::Result<T, OrdoError>;

// ---------------------------------------------------------------------------
// Reporter: logger-like capability
// ---------------------------------------------------------------------------

/// Logger capability handed to helpers and extensions via the context.
///
/// `fields` carries optional structured data attached to the message.
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str, fields: Option<&serde_json::Value>);
    fn warn(&self, message: &str, fields: Option<&serde_json::Value>);
    fn error(&self, message: &str, fields: Option<&serde_json::Value>);
    fn debug(&self, message: &str, fields: Option<&serde_json::Value>);

    /// Return a reporter scoped under `scope`.
    fn child(&self, scope: &str) -> Arc<dyn Reporter>;
}

fn join_scope(parent: &str, scope: &str) -> String {
    if parent.is_empty() {
        scope.to_string()
    } else {
        format!("{parent}.{scope}")
    }
}

fn render_fields(fields: Option<&serde_json::Value>) -> String {
    fields.map(|f| f.to_string()).unwrap_or_default()
}

/// Reporter that forwards every message to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingReporter {
    scope: String,
}

impl TracingReporter {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl Reporter for TracingReporter {
    fn info(&self, message: &str, fields: Option<&serde_json::Value>) {
        tracing::info!(scope = %self.scope, fields = %render_fields(fields), "{message}");
    }

    fn warn(&self, message: &str, fields: Option<&serde_json::Value>) {
        tracing::warn!(scope = %self.scope, fields = %render_fields(fields), "{message}");
    }

    fn error(&self, message: &str, fields: Option<&serde_json::Value>) {
        tracing::error!(scope = %self.scope, fields = %render_fields(fields), "{message}");
    }

    fn debug(&self, message: &str, fields: Option<&serde_json::Value>) {
        tracing::debug!(scope = %self.scope, fields = %render_fields(fields), "{message}");
    }

    fn child(&self, scope: &str) -> Arc<dyn Reporter> {
        Arc::new(TracingReporter::new(join_scope(&self.scope, scope)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub level: ReportLevel,
    pub scope: String,
    pub message: String,
    pub fields: Option<serde_json::Value>,
}

/// Reporter that keeps every entry in memory.
///
/// Children share the same entry log, so a test can inspect everything a run
/// reported from one handle.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    scope: String,
    entries: Arc<Mutex<Vec<ReportEntry>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn entries_at(&self, level: ReportLevel) -> Vec<ReportEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    fn record(&self, level: ReportLevel, message: &str, fields: Option<&serde_json::Value>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(ReportEntry {
                level,
                scope: self.scope.clone(),
                message: message.to_string(),
                fields: fields.cloned(),
            });
        }
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, message: &str, fields: Option<&serde_json::Value>) {
        self.record(ReportLevel::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: Option<&serde_json::Value>) {
        self.record(ReportLevel::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: Option<&serde_json::Value>) {
        self.record(ReportLevel::Error, message, fields);
    }

    fn debug(&self, message: &str, fields: Option<&serde_json::Value>) {
        self.record(ReportLevel::Debug, message, fields);
    }

    fn child(&self, scope: &str) -> Arc<dyn Reporter> {
        Arc::new(RecordingReporter {
            scope: join_scope(&self.scope, scope),
            entries: Arc::clone(&self.entries),
        })
    }
}

// ---------------------------------------------------------------------------
// PipelineContext: what the engine needs from a domain context
// ---------------------------------------------------------------------------

/// Contract for the context object a pipeline domain builds per run.
pub trait PipelineContext: Send + Sync {
    fn reporter(&self) -> &dyn Reporter;
}
