use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod actor;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod geometry;
pub mod runtime;
pub mod scheduler;
pub mod viewer;

pub use actor::{DisplayedFrame, RenderActorHandle, SurfaceStatus};
pub use cancel::CancelToken;
pub use catalog::{ProjectCatalog, ProjectContent, ProjectRecord};
pub use config::{PaddingPolicy, ViewerConfig};
pub use error::{CatalogError, ConfigError, LoadError, RenderError};
pub use geometry::{LogicalSize, PixelSize, SurfaceGeometry};
pub use runtime::RuntimeCell;
pub use scheduler::{Effect, RenderScheduler, SchedulerState, SettleKind};
pub use viewer::{
    load_document, ContainerMetrics, FallbackActions, LoadTicket, PdfViewer, ViewerStatus,
};

pub type DocumentId = Uuid;

const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x3f0c1c5e_5a8e_5d43_9b0e_6ad1f2b7c4a9);

/// Stable identifier for a document source. The same URL always maps to the same id.
pub fn document_id_for_source(source: &str) -> DocumentId {
    Uuid::new_v5(&DOCUMENT_NAMESPACE, source.trim().as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub source: String,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

/// Natural size of a page at unit scale, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// One request to put a page on the draw surface.
///
/// `page` is 1-based. The container and padding values are logical pixels
/// captured when the request was issued; the latest request always carries
/// the latest geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page: usize,
    pub container_width_px: f32,
    pub device_pixel_ratio: f32,
    pub padding_px: f32,
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A fully rasterized page ready to be presented.
#[derive(Debug, Clone)]
pub struct Frame {
    pub request: RenderRequest,
    pub geometry: SurfaceGeometry,
    pub image: RenderImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    NextPage,
    PrevPage,
    GotoPage { page: usize },
}

/// A parsed document. Owned by one viewer for as long as its source is current.
#[async_trait::async_trait]
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    async fn page_size(&self, page: usize) -> Result<PageSize, RenderError>;

    /// Rasterizes `page` into a bitmap of exactly `target` pixels.
    ///
    /// Implementations check `cancel` at least before and after the expensive
    /// part and return [`RenderError::Cancelled`] once it fires.
    async fn render_page(
        &self,
        page: usize,
        target: PixelSize,
        cancel: &CancelToken,
    ) -> Result<RenderImage, RenderError>;
}

#[async_trait::async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, source: &str) -> Result<Arc<dyn DocumentBackend>, LoadError>;
}

/// Host-provided bitmap surface. Only whole frames are ever presented.
pub trait DrawSurface: Send {
    fn present(&mut self, frame: &Frame) -> Result<()>;

    fn clear(&mut self) -> Result<()>;
}

pub type SharedSurface = Arc<Mutex<Box<dyn DrawSurface>>>;

pub fn shared_surface<S: DrawSurface + 'static>(surface: S) -> SharedSurface {
    Arc::new(Mutex::new(Box::new(surface)))
}
