use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use deckview_core::{
    document_id_for_source, CancelToken, DocumentBackend, DocumentInfo, DocumentLoader,
    DocumentMetadata, LoadError, PageSize, PixelSize, RenderError, RenderImage, RuntimeCell,
};
use image::imageops::{self, FilterType};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, info, instrument, warn};

pub mod source;

pub use source::{classify_source, fetch_source, suggested_file_name, SourceLocation};

/// Environment variable naming the pdfium shared library (or its directory).
pub const PDFIUM_LIBRARY_ENV: &str = "DECKVIEW_PDFIUM_LIBRARY_PATH";

static PDFIUM: RuntimeCell<Pdfium> = RuntimeCell::new();

/// Loads PDFs with pdfium. The library is bound on the first load and shared
/// by every document for the rest of the process.
#[derive(Debug, Clone, Default)]
pub struct PdfiumLoader {
    library_path: Option<PathBuf>,
}

impl PdfiumLoader {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }
}

#[async_trait]
impl DocumentLoader for PdfiumLoader {
    #[instrument(skip(self))]
    async fn load(&self, source: &str) -> Result<Arc<dyn DocumentBackend>, LoadError> {
        let library_path = self.library_path.clone();
        let pdfium = tokio::task::spawn_blocking(move || runtime(library_path.as_deref()))
            .await
            .map_err(|err| LoadError::RuntimeUnavailable(err.to_string()))??;

        let bytes = fetch_source(source).await?;
        let url = source.to_string();
        let document =
            tokio::task::spawn_blocking(move || PdfiumDocument::open(pdfium, url, bytes))
                .await
                .map_err(|err| LoadError::Parse {
                    url: source.to_string(),
                    detail: err.to_string(),
                })??;
        info!(source, pages = document.info.page_count, "opened document");
        Ok(Arc::new(document))
    }
}

fn runtime(library_path: Option<&Path>) -> Result<&'static Pdfium, LoadError> {
    PDFIUM
        .get_or_try_init(|| bind_pdfium(library_path))
        .map_err(LoadError::RuntimeUnavailable)
}

fn bind_pdfium(configured: Option<&Path>) -> Result<Pdfium, String> {
    let mut candidates = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    if let Some(path) = env::var_os(PDFIUM_LIBRARY_ENV).filter(|p| !p.is_empty()) {
        candidates.push(PathBuf::from(path));
    }
    candidates.push(PathBuf::from("./"));

    let mut errors = Vec::new();
    for candidate in candidates {
        let library = if candidate.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&candidate)
        } else {
            candidate
        };
        match Pdfium::bind_to_library(&library) {
            Ok(bindings) => {
                debug!(library = %library.display(), "bound pdfium");
                return Ok(Pdfium::new(bindings));
            }
            Err(err) => errors.push(format!("{}: {err}", library.display())),
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            warn!(attempts = ?errors, "no usable pdfium library");
            Err(format!(
                "failed to bind to a pdfium library; set {PDFIUM_LIBRARY_ENV} or install it ({})",
                errors.join(", ")
            ))
        }
    }
}

struct PdfiumDocument {
    info: DocumentInfo,
    document: Arc<Mutex<PdfDocument<'static>>>,
}

impl PdfiumDocument {
    fn open(pdfium: &'static Pdfium, url: String, bytes: Vec<u8>) -> Result<Self, LoadError> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(|err| LoadError::Parse {
                url: url.clone(),
                detail: err.to_string(),
            })?;
        let info = build_document_info(&url, &document);
        if info.page_count == 0 {
            return Err(LoadError::EmptyDocument { url });
        }
        Ok(Self {
            info,
            document: Arc::new(Mutex::new(document)),
        })
    }

    async fn with_page<R, F>(&self, page: usize, f: F) -> Result<R, RenderError>
    where
        R: Send + 'static,
        F: FnOnce(&PdfPage<'_>) -> Result<R, RenderError> + Send + 'static,
    {
        let document = Arc::clone(&self.document);
        let page_count = self.info.page_count;
        tokio::task::spawn_blocking(move || {
            let index = page_index(page, page_count)?;
            let guard = document.lock();
            let pdf_page = guard
                .pages()
                .get(index)
                .map_err(|err| RenderError::Failure {
                    page,
                    detail: err.to_string(),
                })?;
            f(&pdf_page)
        })
        .await
        .map_err(|err| RenderError::Failure {
            page,
            detail: format!("render task failed: {err}"),
        })?
    }
}

#[async_trait]
impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    async fn page_size(&self, page: usize) -> Result<PageSize, RenderError> {
        self.with_page(page, |pdf_page| {
            Ok(PageSize {
                width: pdf_page.width().value,
                height: pdf_page.height().value,
            })
        })
        .await
    }

    #[instrument(skip(self, cancel))]
    async fn render_page(
        &self,
        page: usize,
        target: PixelSize,
        cancel: &CancelToken,
    ) -> Result<RenderImage, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let token = cancel.clone();
        let image = self
            .with_page(page, move |pdf_page| {
                // The page lock may have been contended; the request can be stale by now.
                if token.is_cancelled() {
                    return Err(RenderError::Cancelled);
                }
                rasterize(pdf_page, page, target)
            })
            .await?;
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        Ok(image)
    }
}

fn page_index(page: usize, page_count: usize) -> Result<PdfPageIndex, RenderError> {
    if page == 0 || page > page_count {
        return Err(RenderError::PageOutOfRange { page, page_count });
    }
    PdfPageIndex::try_from(page - 1)
        .map_err(|_| RenderError::PageOutOfRange { page, page_count })
}

fn rasterize(
    pdf_page: &PdfPage<'_>,
    page: usize,
    target: PixelSize,
) -> Result<RenderImage, RenderError> {
    let failure = |detail: String| RenderError::Failure { page, detail };
    let width = i32::try_from(target.width).map_err(|_| failure("target too wide".into()))?;
    let height = i32::try_from(target.height).map_err(|_| failure("target too tall".into()))?;

    let config = PdfRenderConfig::new().set_target_size(width, height);
    let bitmap = pdf_page
        .render_with_config(&config)
        .map_err(|err| failure(err.to_string()))?;
    let rgba = bitmap.as_image().to_rgba8();
    let (width, height) = rgba.dimensions();
    fit_to_target(width, height, rgba.into_raw(), target).ok_or_else(|| {
        failure(format!(
            "rasterizer returned {width}x{height} bytes that do not form an RGBA bitmap"
        ))
    })
}

/// Pdfium rounds target sizes on its own; the surface expects exactly the
/// backing size it asked for.
fn fit_to_target(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    target: PixelSize,
) -> Option<RenderImage> {
    if width == target.width && height == target.height {
        return Some(RenderImage {
            width,
            height,
            pixels,
        });
    }
    let source = image::RgbaImage::from_raw(width, height, pixels)?;
    let resized = imageops::resize(&source, target.width, target.height, FilterType::Triangle);
    Some(RenderImage {
        width: target.width,
        height: target.height,
        pixels: resized.into_raw(),
    })
}

fn build_document_info(source: &str, document: &PdfDocument<'_>) -> DocumentInfo {
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned())
        .filter(|t| !t.trim().is_empty());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned())
        .filter(|a| !a.trim().is_empty());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| {
            t.value()
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    DocumentInfo {
        id: document_id_for_source(source),
        source: source.to_string(),
        page_count,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
    }
}
