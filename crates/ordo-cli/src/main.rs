//! CLI binary for inspecting helper pipeline manifests.

mod manifest;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use manifest::{evaluate, load_manifest, Evaluation};

#[derive(Parser)]
#[command(name = "ordo", version, about = "Dry-run helper pipeline manifests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the execution order of a manifest's helpers
    Plan {
        /// Path to the manifest .json file
        manifest: PathBuf,
    },

    /// Check a manifest for conflicts, missing dependencies, and cycles
    Validate {
        /// Path to the manifest .json file
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output stays parseable.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Plan { manifest } => {
            cmd_plan(&manifest, cli.json).await?;
        }
        Commands::Validate { manifest } => {
            cmd_validate(&manifest, cli.json).await?;
        }
    }

    Ok(())
}

async fn cmd_plan(path: &Path, json: bool) -> anyhow::Result<()> {
    let manifest = load_manifest(path)?;
    tracing::debug!(
        manifest = %path.display(),
        fragments = manifest.fragments.len(),
        builders = manifest.builders.len(),
        "Loaded manifest"
    );
    let eval = evaluate(&manifest).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&eval)?);
    } else {
        print_plan(&eval);
        print_diagnostics(&eval);
    }

    if !eval.valid {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let manifest = load_manifest(path)?;
    let eval = evaluate(&manifest).await;

    if json {
        let report = serde_json::json!({
            "name": eval.name,
            "valid": eval.valid,
            "errors": eval.errors,
            "diagnostics": eval.diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if eval.valid && eval.diagnostics.is_empty() {
        println!("Manifest is valid");
    } else {
        print_diagnostics(&eval);
    }

    if !eval.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn print_plan(eval: &Evaluation) {
    println!("Pipeline: {}", eval.name);
    if eval.steps.is_empty() {
        println!("No steps resolved");
        return;
    }

    println!("\nSteps:");
    for (position, step) in eval.steps.iter().enumerate() {
        let mut line = format!("  {:>2}. [{}] {}", position + 1, step.kind, step.key);
        if step.priority != 0 {
            line.push_str(&format!(" priority={}", step.priority));
        }
        if !step.depends_on.is_empty() {
            line.push_str(&format!(" after={}", step.depends_on.join(",")));
        }
        if let Some(origin) = &step.origin {
            line.push_str(&format!(" origin={origin}"));
        }
        println!("{line}");
    }
}

fn print_diagnostics(eval: &Evaluation) {
    for diag in &eval.diagnostics {
        println!("[{}] {}", diag.type_name(), diag.message());
    }
    for error in &eval.errors {
        println!("[ERROR] {error}");
    }
}
