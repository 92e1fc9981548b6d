//! Workflow definition loader
//!
//! Load definitions from YAML or JSON files, or from every such file in a
//! directory.

use std::path::Path;

use super::definition::{DefinitionDocument, DefinitionValidationError, WorkflowDefinition};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("JSON parse error in {file}: {error}")]
    Json {
        file: String,
        error: serde_json::Error,
    },

    #[error("{file}: {error}")]
    Validation {
        file: String,
        error: DefinitionValidationError,
    },
}

pub struct DefinitionLoader;

impl DefinitionLoader {
    /// Load every `.yaml`, `.yml` and `.json` definition in `dir`, sorted by file name
    pub fn load_directory(dir: &Path) -> Result<Vec<WorkflowDefinition>, LoadError> {
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

            // Skip runner.yaml - it's a config file, not a workflow
            if filename == "runner.yaml" || filename == "runner.yml" {
                continue;
            }

            let ext = path.extension().and_then(|e| e.to_str());
            if matches!(ext, Some("yaml") | Some("yml") | Some("json")) {
                paths.push(path);
            }
        }

        paths.sort();
        paths.iter().map(|path| Self::load_file(path)).collect()
    }

    pub fn load_file(path: &Path) -> Result<WorkflowDefinition, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let file = path.display().to_string();

        let document: DefinitionDocument =
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                serde_json::from_str(&content).map_err(|error| LoadError::Json {
                    file: file.clone(),
                    error,
                })?
            } else {
                serde_yaml::from_str(&content).map_err(|error| LoadError::Yaml {
                    file: file.clone(),
                    error,
                })?
            };

        WorkflowDefinition::try_from(document).map_err(|error| LoadError::Validation { file, error })
    }

    pub fn from_yaml_str(content: &str) -> Result<WorkflowDefinition, LoadError> {
        let document: DefinitionDocument =
            serde_yaml::from_str(content).map_err(|error| LoadError::Yaml {
                file: "<inline>".to_string(),
                error,
            })?;

        WorkflowDefinition::try_from(document).map_err(|error| LoadError::Validation {
            file: "<inline>".to_string(),
            error,
        })
    }
}
