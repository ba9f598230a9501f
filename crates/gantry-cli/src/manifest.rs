//! Project manifest parsing.

use std::path::PathBuf;

use gantry_core::Project;
use kdl::{KdlDocument, KdlNode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// A parsed project manifest.
#[derive(Debug, Clone)]
pub struct ProjectManifest {
    pub name: String,
    pub remote_url: String,
    pub local_path: PathBuf,
    pub steps: Vec<String>,
}

impl ProjectManifest {
    /// Turn the manifest into a project with a fresh id.
    pub fn into_project(self) -> Project {
        Project::new(self.name, self.remote_url, self.local_path).with_build_steps(self.steps)
    }
}

/// Read and parse a manifest file.
pub fn load_manifest(path: &str) -> ManifestResult<ProjectManifest> {
    parse_manifest(&std::fs::read_to_string(path)?)
}

/// Parse a project manifest from KDL text.
///
/// ```kdl
/// project "my-service"
///
/// remote "https://github.com/your-org/my-service.git"
/// path "/srv/gantry/my-service"
///
/// step "cargo build --release"
/// step "cargo test"
/// ```
pub fn parse_manifest(kdl: &str) -> ManifestResult<ProjectManifest> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name: Option<String> = None;
    let mut remote_url: Option<String> = None;
    let mut local_path: Option<String> = None;
    let mut steps = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => set_once(&mut name, node, "project name")?,
            "remote" => set_once(&mut remote_url, node, "remote url")?,
            "path" => set_once(&mut local_path, node, "local path")?,
            "step" => {
                let command = first_string_arg(node)
                    .ok_or_else(|| ManifestError::MissingField("step command".to_string()))?;
                steps.push(command);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(ProjectManifest {
        name: name.ok_or_else(|| ManifestError::MissingField("project name".to_string()))?,
        remote_url: remote_url
            .ok_or_else(|| ManifestError::MissingField("remote url".to_string()))?,
        local_path: PathBuf::from(
            local_path.ok_or_else(|| ManifestError::MissingField("local path".to_string()))?,
        ),
        steps,
    })
}

fn set_once(slot: &mut Option<String>, node: &KdlNode, what: &str) -> ManifestResult<()> {
    let value =
        first_string_arg(node).ok_or_else(|| ManifestError::MissingField(what.to_string()))?;
    if slot.replace(value).is_some() {
        return Err(ManifestError::Duplicate(what.to_string()));
    }
    Ok(())
}

fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}
