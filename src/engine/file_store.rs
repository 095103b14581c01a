//! JSON-backed project store.
//!
//! A project file holds the project identity, one entry per scan (each with
//! its own entry id) and the optional composite container.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{CompositeContainer, Model, Scan};

use super::{EntryId, Project, ProjectStore};

/// Extension of project files inside a project directory.
pub const PROJECT_FILE_EXTENSION: &str = "a3d";

#[derive(Debug, Serialize, Deserialize)]
struct ProjectDocument {
    project_id: Uuid,
    entries: Vec<ProjectEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    composite: Option<CompositeContainer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectEntry {
    id: EntryId,
    scan: Scan,
}

/// Project store writing one JSON document per project file.
#[derive(Debug, Clone, Default)]
pub struct FileProjectStore;

impl FileProjectStore {
    pub fn new() -> Self {
        Self
    }

    async fn read_document(path: &Path) -> Result<ProjectDocument, EngineError> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            EngineError::Persistence(format!("could not read {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            EngineError::Persistence(format!("malformed project {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    async fn open_project(&self, path: &Path) -> Result<Project, EngineError> {
        let doc = Self::read_document(path).await?;
        Ok(Project {
            path: path.to_path_buf(),
            id: doc.project_id,
        })
    }

    async fn list_entries(&self, project: &Project) -> Result<Vec<EntryId>, EngineError> {
        let doc = Self::read_document(&project.path).await?;
        Ok(doc.entries.iter().map(|e| e.id).collect())
    }

    async fn load(&self, project: &Project, entries: &[EntryId]) -> Result<Model, EngineError> {
        let doc = Self::read_document(&project.path).await?;

        if let Some(missing) = entries
            .iter()
            .find(|id| !doc.entries.iter().any(|e| e.id == **id))
        {
            return Err(EngineError::Persistence(format!(
                "entry {} not found in project {}",
                missing, project.id
            )));
        }

        let scans = doc
            .entries
            .into_iter()
            .filter(|e| entries.contains(&e.id))
            .map(|e| e.scan)
            .collect();

        Ok(Model {
            scans,
            composite: doc.composite,
        })
    }

    async fn create_project(&self, path: &Path, project_id: Uuid) -> Result<Project, EngineError> {
        Ok(Project {
            path: path.to_path_buf(),
            id: project_id,
        })
    }

    async fn save(&self, project: &Project, model: &Model) -> Result<(), EngineError> {
        let doc = ProjectDocument {
            project_id: project.id,
            entries: model
                .scans
                .iter()
                .map(|scan| ProjectEntry {
                    id: Uuid::new_v4(),
                    scan: scan.clone(),
                })
                .collect(),
            composite: model.composite.clone(),
        };

        let data = serde_json::to_vec(&doc)
            .map_err(|e| EngineError::Persistence(format!("could not encode project: {}", e)))?;

        tokio::fs::write(&project.path, data).await.map_err(|e| {
            EngineError::Persistence(format!(
                "could not write {}: {}",
                project.path.display(),
                e
            ))
        })?;

        debug!(
            "Wrote project {} ({} entries) to {}",
            project.id,
            doc.entries.len(),
            project.path.display()
        );
        Ok(())
    }
}
