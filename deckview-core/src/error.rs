use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal for a document instance: the viewer switches to its fallback state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("failed to fetch {url}: {detail}")]
    Network { url: String, detail: String },

    #[error("failed to parse {url}: {detail}")]
    Parse { url: String, detail: String },

    #[error("rasterization runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("{url} contains no pages")]
    EmptyDocument { url: String },

    #[error("loading {url} timed out after {after:?}")]
    TimedOut { url: String, after: Duration },

    #[error("unsupported document source {0}")]
    UnsupportedSource(String),
}

/// Per-attempt render failures. None of these affect the scheduler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("render cancelled")]
    Cancelled,

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("failed to render page {page}: {detail}")]
    Failure { page: usize, detail: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read project catalog {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode project catalog: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to decode project catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate project id {0:?}")]
    DuplicateId(String),
}
