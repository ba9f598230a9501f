//! CLI command implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gantry_core::{Build, BuildStatus, HookSink, LogHookSink, Project};
use gantry_executor::{BuildExecutor, ExecutorConfig, ProcessGit, ProcessShell};
use gantry_scheduler::BuildQueue;
use gantry_store::{BuildStore, MemoryBuildStore, MemoryProjectStore};

use crate::manifest;

pub struct RunOptions {
    pub manifest: String,
    pub branch: String,
    pub revision: Option<String>,
    pub title: Option<String>,
    pub author: String,
    pub tags: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub json: bool,
}

/// Run one build of the manifest's project and follow it to the end.
pub async fn run(options: RunOptions) -> Result<()> {
    let project = load_project(&options.manifest)?;

    let config = match options.timeout_secs {
        Some(secs) => {
            let config = ExecutorConfig::new(Duration::from_secs(secs));
            config.validate()?;
            config
        }
        None => ExecutorConfig::from_env()?,
    };

    let title = options
        .title
        .unwrap_or_else(|| format!("manual build of {}", options.branch));
    let mut build =
        Build::new(project.id, title, &options.branch, &options.author).with_tags(options.tags);
    if let Some(revision) = options.revision {
        build = build.with_revision(revision);
    }

    if !options.json {
        println!("Running build for project: {}", project.name);
        println!("Steps: {} (+ checkout)", project.build_steps.len());
        println!("Ref: {}", build.effective_ref());
        println!();
    }

    let projects = Arc::new(MemoryProjectStore::new());
    let builds = Arc::new(MemoryBuildStore::new());
    projects.insert(project.clone()).await;
    let (project_id, build_id) = (build.project_id, build.id);
    builds.insert(build).await;

    let hooks: Arc<dyn HookSink> = Arc::new(LogHookSink);
    let executor = Arc::new(BuildExecutor::new(
        projects.clone(),
        builds.clone(),
        Arc::new(ProcessGit),
        Arc::new(ProcessShell),
        hooks.clone(),
        config,
    ));
    let queue = BuildQueue::start(executor, builds.clone(), hooks);
    queue.enqueue(project_id, build_id);

    // Follow the record, printing chunks as they are persisted.
    let mut printed = 0;
    let finished = loop {
        let build = builds.get(project_id, build_id).await?;
        if !options.json {
            for chunk in &build.output[printed..] {
                println!("{}", chunk.content);
            }
            printed = build.output.len();
        }
        if build.status.is_terminal() {
            break build;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else {
        println!();
        match finished.status {
            BuildStatus::Success => println!("✓ Build succeeded"),
            BuildStatus::Failed => println!(
                "✗ Build failed (exit code {})",
                finished.exit_code.unwrap_or(-1)
            ),
            BuildStatus::TimedOut => println!("✗ Build timed out"),
            _ => {}
        }
        if let (Some(started), Some(ended)) = (finished.started_at, finished.finished_at) {
            let elapsed = ended - started;
            println!(
                "Duration: {:.1}s",
                elapsed.num_milliseconds() as f64 / 1000.0
            );
        }
    }

    match finished.status {
        BuildStatus::Success => Ok(()),
        BuildStatus::TimedOut => std::process::exit(124),
        _ => std::process::exit(1),
    }
}

/// Parse a manifest and report what it defines.
pub fn validate(path: &str) -> Result<()> {
    match manifest::load_manifest(path) {
        Ok(manifest) => {
            println!("Manifest is valid");
            println!("  project: {}", manifest.name);
            println!("  remote:  {}", manifest.remote_url);
            println!("  steps:   {}", manifest.steps.len());
            Ok(())
        }
        Err(err) => {
            println!("Manifest error: {}", err);
            std::process::exit(1);
        }
    }
}

fn load_project(path: &str) -> Result<Project> {
    let manifest = manifest::load_manifest(path)
        .with_context(|| format!("failed to load manifest: {}", path))?;
    Ok(manifest.into_project())
}
