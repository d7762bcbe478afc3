//! JSON helper manifests and the inert domain used to dry-run them.
//!
//! A manifest only describes helper wiring (keys, modes, priorities,
//! dependencies). Every helper is registered with a body that records its key,
//! so running the pipeline yields the resolved plan without side effects.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use ordo_pipeline::{
    helper_fn, Helper, HelperBuilder, HelperDescriptor, HelperKind, HelperMode, Pipeline,
    PipelineDefinition, PipelineDiagnostic, PipelineStep, RunScope,
};
use ordo_types::{PipelineContext, Reporter, Result, TracingReporter};

// ---------------------------------------------------------------------------
// Manifest format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub fragments: Vec<HelperEntry>,
    #[serde(default)]
    pub builders: Vec<HelperEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperEntry {
    pub key: String,
    #[serde(default)]
    pub mode: HelperMode,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

pub fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let manifest = serde_json::from_str(&source)
        .with_context(|| format!("failed to parse manifest {}", path.display()))?;
    Ok(manifest)
}

// ---------------------------------------------------------------------------
// Dry-run domain
// ---------------------------------------------------------------------------

type Draft = Arc<Mutex<Vec<String>>>;

pub struct ManifestContext {
    reporter: TracingReporter,
}

impl PipelineContext for ManifestContext {
    fn reporter(&self) -> &dyn Reporter {
        &self.reporter
    }
}

/// The finalized plan: fragment keys in the order they ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub name: String,
    pub fragments: Vec<String>,
}

pub struct FragmentInput {
    key: String,
    draft: Draft,
    reporter: Arc<dyn Reporter>,
}

pub struct BuilderInput {
    key: String,
    plan_name: String,
    reporter: Arc<dyn Reporter>,
}

pub struct ManifestDefinition {
    name: String,
}

impl PipelineDefinition for ManifestDefinition {
    type RunOptions = ();
    type BuildOptions = ();
    type Context = ManifestContext;
    type Draft = Draft;
    type Artifact = Plan;
    type FragmentArgs = FragmentInput;
    type BuilderArgs = BuilderInput;

    fn create_build_options(&self, _options: &()) -> Result<()> {
        Ok(())
    }

    fn create_context(&self, _options: &()) -> Result<ManifestContext> {
        Ok(ManifestContext {
            reporter: TracingReporter::new(format!("ordo.{}", self.name)),
        })
    }

    fn create_fragment_state(&self, _scope: RunScope<'_, Self>) -> Result<Draft> {
        Ok(Draft::default())
    }

    fn create_fragment_args(
        &self,
        helper: &HelperDescriptor,
        scope: RunScope<'_, Self>,
        draft: &Draft,
    ) -> FragmentInput {
        FragmentInput {
            key: helper.key.clone(),
            draft: Arc::clone(draft),
            reporter: scope.context.reporter().child("fragments"),
        }
    }

    fn finalize_fragment_state(
        &self,
        draft: Draft,
        _scope: RunScope<'_, Self>,
        _helpers: &[&HelperDescriptor],
    ) -> Result<Plan> {
        let fragments = draft.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(Plan {
            name: self.name.clone(),
            fragments,
        })
    }

    fn create_builder_args(
        &self,
        helper: &HelperDescriptor,
        scope: RunScope<'_, Self>,
        artifact: &Plan,
    ) -> BuilderInput {
        BuilderInput {
            key: helper.key.clone(),
            plan_name: artifact.name.clone(),
            reporter: scope.context.reporter().child("builders"),
        }
    }
}

fn fragment_helper(entry: &HelperEntry) -> Helper<FragmentInput> {
    describe(entry, HelperKind::Fragment).build(helper_fn(|input: FragmentInput| async move {
        input.reporter.debug(&format!("Applied fragment {}", input.key), None);
        input
            .draft
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input.key);
        Ok(())
    }))
}

fn builder_helper(entry: &HelperEntry) -> Helper<BuilderInput> {
    describe(entry, HelperKind::Builder).build(helper_fn(|input: BuilderInput| async move {
        let fields = serde_json::json!({ "plan": input.plan_name });
        input
            .reporter
            .debug(&format!("Would run builder {}", input.key), Some(&fields));
        Ok(())
    }))
}

fn describe(entry: &HelperEntry, kind: HelperKind) -> HelperBuilder {
    let builder = HelperBuilder::new(entry.key.clone(), kind)
        .mode(entry.mode)
        .priority(entry.priority)
        .depends_on(entry.depends_on.iter().cloned());
    match &entry.origin {
        Some(origin) => builder.origin(origin.clone()),
        None => builder,
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Everything a dry run learned about a manifest.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub name: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub steps: Vec<PipelineStep>,
    pub fragments: Vec<String>,
    pub diagnostics: Vec<PipelineDiagnostic>,
}

/// Register every manifest entry and run the pipeline once.
///
/// Registration failures are collected rather than returned, so one report
/// covers every problem the engine can see.
pub async fn evaluate(manifest: &Manifest) -> Evaluation {
    let mut pipeline = Pipeline::new(ManifestDefinition {
        name: manifest.name.clone(),
    });
    let mut errors = Vec::new();

    for entry in &manifest.fragments {
        if let Err(err) = pipeline.use_fragment(fragment_helper(entry)) {
            errors.push(err.to_string());
        }
    }
    for entry in &manifest.builders {
        if let Err(err) = pipeline.use_builder(builder_helper(entry)) {
            errors.push(err.to_string());
        }
    }

    let (steps, fragments) = match pipeline.run(()).await {
        Ok(state) => (state.steps, state.artifact.fragments),
        Err(err) => {
            errors.push(err.to_string());
            (Vec::new(), Vec::new())
        }
    };

    Evaluation {
        name: manifest.name.clone(),
        valid: errors.is_empty(),
        errors,
        steps,
        fragments,
        diagnostics: pipeline.diagnostics(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn entry(key: &str, deps: &[&str]) -> HelperEntry {
        HelperEntry {
            key: key.into(),
            mode: HelperMode::Extend,
            priority: 0,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            origin: None,
        }
    }

    #[test]
    fn load_manifest_reads_camel_case_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "name": "scaffold",
                "fragments": [
                    {{ "key": "meta" }},
                    {{ "key": "detect", "dependsOn": ["meta"], "priority": 2, "mode": "override", "origin": "core" }}
                ]
            }}"#
        )
        .unwrap();

        let manifest = load_manifest(file.path()).unwrap();
        assert_eq!(manifest.name, "scaffold");
        assert!(manifest.builders.is_empty());
        let detect = &manifest.fragments[1];
        assert_eq!(detect.depends_on, vec!["meta"]);
        assert_eq!(detect.mode, HelperMode::Override);
        assert_eq!(detect.priority, 2);
        assert_eq!(detect.origin.as_deref(), Some("core"));
    }

    #[test]
    fn load_manifest_reports_path_on_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_manifest(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse manifest"));
    }

    #[test]
    fn load_manifest_fails_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_manifest(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read manifest"));
    }

    #[tokio::test]
    async fn evaluate_resolves_plan_order() {
        let manifest = Manifest {
            name: "scaffold".into(),
            fragments: vec![
                entry("dependencies", &["detect"]),
                entry("detect", &["meta"]),
                entry("meta", &[]),
            ],
            builders: vec![entry("scaffold", &[])],
        };

        let eval = evaluate(&manifest).await;
        assert!(eval.valid, "unexpected errors: {:?}", eval.errors);
        let keys: Vec<&str> = eval.steps.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["meta", "detect", "dependencies", "scaffold"]);
        assert_eq!(eval.fragments, vec!["meta", "detect", "dependencies"]);
    }

    #[tokio::test]
    async fn evaluate_collects_registration_and_run_errors() {
        let mut first = entry("meta", &[]);
        first.mode = HelperMode::Override;
        let second = first.clone();
        let manifest = Manifest {
            name: "broken".into(),
            fragments: vec![first, second, entry("types", &["ghost"])],
            builders: vec![],
        };

        let eval = evaluate(&manifest).await;
        assert!(!eval.valid);
        assert_eq!(eval.errors.len(), 2);
        assert!(eval.errors[0].contains("already registered with mode \"override\""));
        assert!(eval.errors[1].contains("depends on unknown helper \"ghost\""));
        assert!(eval.steps.is_empty());

        let kinds: Vec<&str> = eval.diagnostics.iter().map(|d| d.type_name()).collect();
        assert_eq!(kinds, vec!["conflict", "missing-dependency", "unused-helper"]);
    }

    #[test]
    fn evaluation_serializes_for_json_output() {
        let eval = Evaluation {
            name: "n".into(),
            valid: true,
            errors: vec![],
            steps: vec![],
            fragments: vec![],
            diagnostics: vec![],
        };
        let json = serde_json::to_value(&eval).unwrap();
        assert_eq!(json["valid"], true);
        assert!(json["steps"].as_array().unwrap().is_empty());
    }
}
