//! Host-side view state for one presentation: current page, page count,
//! loading/error flags and container geometry. All rendering goes through
//! the render actor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::actor::{RenderActorHandle, SurfaceStatus};
use crate::config::ViewerConfig;
use crate::error::LoadError;
use crate::{
    DocumentBackend, DocumentInfo, DocumentLoader, RenderRequest, SharedSurface, ViewerCommand,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerStatus {
    Loading,
    Ready,
    Error(LoadError),
}

/// Latest observation of the viewer's container, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerMetrics {
    pub container_width_px: f32,
    /// Width of the whole window; picks the padding class.
    pub window_width_px: f32,
    pub device_pixel_ratio: f32,
}

/// What the error state offers instead of the viewer. Both point at the
/// original, untouched source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackActions {
    pub open_url: String,
    pub download_url: String,
}

/// Identifies one load attempt. Results for an older ticket are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    source: String,
}

impl LoadTicket {
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Loads `source`, rejecting documents without pages.
#[instrument(skip(loader))]
pub async fn load_document(
    loader: &dyn DocumentLoader,
    source: &str,
    timeout: Option<Duration>,
) -> Result<Arc<dyn DocumentBackend>, LoadError> {
    let document = match timeout {
        Some(after) => tokio::time::timeout(after, loader.load(source))
            .await
            .map_err(|_| LoadError::TimedOut {
                url: source.to_string(),
                after,
            })??,
        None => loader.load(source).await?,
    };
    if document.info().page_count == 0 {
        return Err(LoadError::EmptyDocument {
            url: source.to_string(),
        });
    }
    Ok(document)
}

pub struct PdfViewer {
    config: ViewerConfig,
    surface: SharedSurface,
    source: String,
    title: String,
    status: ViewerStatus,
    page_number: usize,
    page_count: usize,
    metrics: ContainerMetrics,
    document: Option<Arc<dyn DocumentBackend>>,
    actor: Option<RenderActorHandle>,
    generation: u64,
}

impl PdfViewer {
    pub fn new(
        config: ViewerConfig,
        surface: SharedSurface,
        source: impl Into<String>,
        title: impl Into<String>,
        metrics: ContainerMetrics,
    ) -> Self {
        Self {
            config,
            surface,
            source: source.into(),
            title: title.into(),
            status: ViewerStatus::Loading,
            page_number: 1,
            page_count: 0,
            metrics,
            document: None,
            actor: None,
            generation: 0,
        }
    }

    /// Loads the current source and renders its first page.
    pub async fn load(&mut self, loader: &dyn DocumentLoader) -> Result<(), LoadError> {
        let ticket = self.begin_load();
        let result = load_document(loader, ticket.source(), self.config.load_timeout).await;
        self.finish_load(ticket, result)
    }

    /// Drops any current document and enters the loading state. The caller
    /// runs the load (e.g. with [`load_document`]) and hands the result to
    /// [`finish_load`](Self::finish_load).
    pub fn begin_load(&mut self) -> LoadTicket {
        self.teardown();
        self.generation += 1;
        self.status = ViewerStatus::Loading;
        LoadTicket {
            generation: self.generation,
            source: self.source.clone(),
        }
    }

    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Arc<dyn DocumentBackend>, LoadError>,
    ) -> Result<(), LoadError> {
        if ticket.generation != self.generation {
            debug!(source = %ticket.source, "discarding result of superseded load");
            return Ok(());
        }

        let result = result.and_then(|document| {
            if document.info().page_count == 0 {
                Err(LoadError::EmptyDocument {
                    url: ticket.source.clone(),
                })
            } else {
                Ok(document)
            }
        });

        match result {
            Ok(document) => {
                self.page_count = document.info().page_count;
                self.page_number = 1;
                info!(
                    source = %self.source,
                    pages = self.page_count,
                    "document ready"
                );
                self.actor = Some(RenderActorHandle::spawn(
                    Arc::clone(&document),
                    Arc::clone(&self.surface),
                    self.config.max_scale,
                ));
                self.document = Some(document);
                self.status = ViewerStatus::Ready;
                self.request_current();
                Ok(())
            }
            Err(err) => {
                warn!(source = %self.source, %err, "failed to load document");
                self.page_count = 0;
                self.status = ViewerStatus::Error(err.clone());
                Err(err)
            }
        }
    }

    /// Switches to another document. The old handle and any render in flight
    /// are abandoned immediately.
    pub fn set_source(&mut self, source: impl Into<String>) -> LoadTicket {
        self.source = source.into();
        self.begin_load()
    }

    fn teardown(&mut self) {
        if let Some(mut actor) = self.actor.take() {
            actor.detach();
            if let Err(err) = self.surface.lock().clear() {
                warn!(?err, "failed to clear draw surface");
            }
        }
        self.document = None;
        self.page_count = 0;
        self.page_number = 1;
    }

    pub fn apply(&mut self, command: ViewerCommand) -> bool {
        match command {
            ViewerCommand::NextPage => self.next(),
            ViewerCommand::PrevPage => self.previous(),
            ViewerCommand::GotoPage { page } => self.go_to(page),
        }
    }

    pub fn previous(&mut self) -> bool {
        if self.page_number <= 1 {
            return false;
        }
        self.go_to(self.page_number - 1)
    }

    pub fn next(&mut self) -> bool {
        if self.page_number >= self.page_count {
            return false;
        }
        self.go_to(self.page_number + 1)
    }

    /// Moves to `page` (clamped to the document). Returns whether a render
    /// was requested.
    pub fn go_to(&mut self, page: usize) -> bool {
        if !self.is_ready() {
            return false;
        }
        let target = page.clamp(1, self.page_count);
        if target == self.page_number {
            return false;
        }
        self.page_number = target;
        self.request_current();
        true
    }

    /// Records a new container observation and re-renders the current page
    /// if a document is ready.
    pub fn resize(&mut self, metrics: ContainerMetrics) -> bool {
        if metrics == self.metrics {
            return false;
        }
        self.metrics = metrics;
        if !self.is_ready() {
            return false;
        }
        self.request_current();
        true
    }

    /// Renders the current page again even if it is already on the surface.
    /// Hosts call this after wiping or re-laying out the area the frame
    /// lives in without changing the container width.
    pub fn repaint(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let request = self.render_request();
        if let Some(actor) = self.actor.as_mut() {
            actor.repaint(request);
        }
        true
    }

    fn request_current(&mut self) {
        let request = self.render_request();
        if let Some(actor) = self.actor.as_mut() {
            actor.request_render(request);
        }
    }

    pub fn render_request(&self) -> RenderRequest {
        let device_pixel_ratio =
            if self.metrics.device_pixel_ratio.is_finite() && self.metrics.device_pixel_ratio > 0.0
            {
                self.metrics.device_pixel_ratio
            } else {
                self.config.device_pixel_ratio
            };
        RenderRequest {
            page: self.page_number,
            container_width_px: self.metrics.container_width_px,
            device_pixel_ratio,
            padding_px: self.config.padding.for_window(self.metrics.window_width_px),
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self.status, ViewerStatus::Ready) && self.actor.is_some()
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, ViewerStatus::Loading)
    }

    pub fn has_error(&self) -> bool {
        matches!(self.status, ViewerStatus::Error(_))
    }

    pub fn status(&self) -> &ViewerStatus {
        &self.status
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn metrics(&self) -> ContainerMetrics {
        self.metrics
    }

    pub fn document_info(&self) -> Option<&DocumentInfo> {
        self.document.as_ref().map(|document| document.info())
    }

    pub fn surface_status(&self) -> Option<SurfaceStatus> {
        self.actor.as_ref().map(|actor| actor.status())
    }

    /// Waits for the render actor to go idle with every request taken in.
    pub async fn wait_for_render(&self) -> Option<SurfaceStatus> {
        match &self.actor {
            Some(actor) => actor.settled().await,
            None => None,
        }
    }

    /// Where the raw document can be fetched from. Offered in every state,
    /// unlike [`fallback`](Self::fallback).
    pub fn download_url(&self) -> &str {
        &self.source
    }

    pub fn fallback(&self) -> Option<FallbackActions> {
        match self.status {
            ViewerStatus::Error(_) => Some(FallbackActions {
                open_url: self.source.clone(),
                download_url: self.source.clone(),
            }),
            _ => None,
        }
    }

    pub fn accessible_label(&self) -> String {
        match self.status {
            ViewerStatus::Ready => format!(
                "{} – page {} of {}",
                self.title, self.page_number, self.page_count
            ),
            ViewerStatus::Loading => format!("{} – loading", self.title),
            ViewerStatus::Error(_) => format!("{} – unable to load PDF", self.title),
        }
    }
}
