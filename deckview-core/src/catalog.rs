//! Read-only project metadata consumed by the detail page.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContent {
    pub overview: String,
    pub challenge: String,
    pub solution: String,
    pub impact: String,
    #[serde(default)]
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub details: Option<String>,
    pub logo: Option<String>,
    pub link: Option<String>,
    /// URL of the slide deck shown in the PDF viewer.
    pub presentation: Option<String>,
    #[serde(alias = "fullContent")]
    pub full_content: Option<ProjectContent>,
}

impl ProjectRecord {
    /// The `(url, title)` pair handed to the viewer, if this project has a deck.
    pub fn presentation_source(&self) -> Option<(&str, &str)> {
        self.presentation
            .as_deref()
            .map(|url| (url, self.name.as_str()))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "project")]
    projects: Vec<ProjectRecord>,
}

/// Ordered list of projects. Order is the file order.
#[derive(Debug, Clone, Default)]
pub struct ProjectCatalog {
    projects: Vec<ProjectRecord>,
}

impl ProjectCatalog {
    pub fn new(projects: Vec<ProjectRecord>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for project in &projects {
            if !seen.insert(project.id.as_str()) {
                return Err(CatalogError::DuplicateId(project.id.clone()));
            }
        }
        Ok(Self { projects })
    }

    /// TOML catalogs list records as `[[project]]` tables.
    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        Self::new(file.projects)
    }

    /// JSON catalogs are a bare array of records.
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let projects: Vec<ProjectRecord> = serde_json::from_str(raw)?;
        Self::new(projects)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_toml_str(&raw),
        }
    }

    pub fn find(&self, id: &str) -> Option<&ProjectRecord> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectRecord> {
        self.projects.iter()
    }

    pub fn with_presentations(&self) -> impl Iterator<Item = &ProjectRecord> {
        self.projects
            .iter()
            .filter(|project| project.presentation.is_some())
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
