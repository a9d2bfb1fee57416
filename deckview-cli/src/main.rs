use std::fs;
use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as Process, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use deckview_core::{
    load_document, shared_surface, DocumentBackend, LoadError, LoadTicket, PdfViewer,
    ProjectCatalog, SchedulerState, SurfaceStatus, ViewerConfig, ViewerStatus,
};
use deckview_render::{fetch_source, suggested_file_name, PdfiumLoader};
use deckview_tty::{write_status_line, KeyMapper, KittySurface, TerminalLayout, UiEvent};
use directories::ProjectDirs;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "deckview",
    version,
    about = "Slide deck viewer for kitty-compatible terminals"
)]
struct Args {
    /// PDF to show: a path, a file:// URL or an http(s) URL
    source: Option<String>,

    /// Show the presentation attached to this catalog project
    #[arg(short = 'p', long = "project", conflicts_with = "source")]
    project: Option<String>,

    /// Project catalog (TOML or JSON); defaults to projects.toml in the config dir
    #[arg(long = "catalog")]
    catalog: Option<PathBuf>,

    /// Title for the status line
    #[arg(short = 't', long = "title")]
    title: Option<String>,

    /// URL or directory that relative presentation links resolve against
    #[arg(long = "base-url")]
    base_url: Option<String>,

    /// Viewer config file; defaults to config.toml in the config dir
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Page to show once the document is ready (1-based)
    #[arg(long = "page")]
    page: Option<usize>,

    /// List catalog projects that have a presentation and exit
    #[arg(long = "list")]
    list: bool,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

type PendingLoad = JoinHandle<(LoadTicket, Result<Arc<dyn DocumentBackend>, LoadError>)>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "deckview", "deckview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load(&config_path)
        .with_context(|| format!("failed to load config {:?}", config_path))?;

    let catalog_path = args
        .catalog
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("projects.toml"));
    if args.list {
        let catalog = ProjectCatalog::load(&catalog_path)
            .with_context(|| format!("failed to load catalog {:?}", catalog_path))?;
        let mut stdout = io::stdout();
        for project in catalog.with_presentations() {
            writeln!(stdout, "{:<28} {}", project.id, project.name)?;
        }
        return Ok(());
    }

    let (raw_source, title) = select_presentation(&args, &catalog_path)?;
    let source = resolve_source(&raw_source, args.base_url.as_deref())?;
    info!(%source, %title, "starting viewer");

    run(config, source, title, args.page).await
}

fn select_presentation(args: &Args, catalog_path: &Path) -> Result<(String, String)> {
    if let Some(id) = &args.project {
        let catalog = ProjectCatalog::load(catalog_path)
            .with_context(|| format!("failed to load catalog {:?}", catalog_path))?;
        let project = catalog
            .find(id)
            .ok_or_else(|| anyhow!("no project named {id:?} in {:?}", catalog_path))?;
        let (url, name) = project
            .presentation_source()
            .ok_or_else(|| anyhow!("project {id:?} has no presentation"))?;
        let title = args.title.clone().unwrap_or_else(|| name.to_string());
        return Ok((url.to_string(), title));
    }

    let source = args
        .source
        .clone()
        .ok_or_else(|| anyhow!("pass a PDF source or --project"))?;
    let title = args
        .title
        .clone()
        .unwrap_or_else(|| suggested_file_name(&source));
    Ok((source, title))
}

/// Relative links (like `/decks/a.pdf` on the web) resolve against `base`,
/// which is either an absolute URL or a local directory.
fn resolve_source(raw: &str, base: Option<&str>) -> Result<String> {
    let Some(base) = base else {
        return Ok(raw.to_string());
    };
    if Url::parse(raw).is_ok() {
        return Ok(raw.to_string());
    }
    match Url::parse(base) {
        Ok(base_url) if base_url.scheme().len() > 1 => {
            let joined = base_url
                .join(raw)
                .with_context(|| format!("cannot resolve {raw:?} against {base}"))?;
            Ok(joined.to_string())
        }
        _ => {
            let path = Path::new(base).join(raw.trim_start_matches('/'));
            Ok(path.to_string_lossy().into_owned())
        }
    }
}

async fn run(
    config: ViewerConfig,
    source: String,
    title: String,
    initial_page: Option<usize>,
) -> Result<()> {
    let device_pixel_ratio = config.device_pixel_ratio;
    let load_timeout = config.load_timeout;
    let loader = Arc::new(PdfiumLoader::new(config.pdfium_library_path.clone()));

    let _raw = RawModeGuard::new()?;
    let stdout = Arc::new(Mutex::new(io::stdout()));
    {
        let mut out = stdout.lock();
        crossterm::execute!(
            &mut *out,
            cursor::Hide,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
    }

    let layout = Arc::new(Mutex::new(current_layout()?));
    let surface = shared_surface(KittySurface::new(Arc::clone(&stdout), Arc::clone(&layout)));
    let metrics = layout.lock().container_metrics(device_pixel_ratio);
    let mut viewer = PdfViewer::new(config, surface, source, title, metrics);

    let mut pending = Some(start_load(&mut viewer, Arc::clone(&loader), load_timeout));
    let mut initial_page = initial_page;
    let mut mapper = KeyMapper::new();
    let mut notice: Option<String> = None;
    let mut last_status = String::new();

    loop {
        if pending.as_ref().is_some_and(|task| task.is_finished()) {
            if let Some(task) = pending.take() {
                let (ticket, result) = task.await?;
                if viewer.finish_load(ticket, result).is_ok() {
                    if let Some(page) = initial_page.take() {
                        viewer.go_to(page);
                    }
                }
            }
        }

        let status = status_text(&viewer, mapper.pending_input(), notice.as_deref());
        if status != last_status {
            draw_status(&stdout, &layout, &status)?;
            last_status = status;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match mapper.map_event(event::read()?) {
            UiEvent::Command(command) => {
                notice = None;
                viewer.apply(command);
            }
            UiEvent::Resize { .. } => {
                let fresh = current_layout()?;
                *layout.lock() = fresh;
                {
                    let mut out = stdout.lock();
                    crossterm::execute!(&mut *out, Clear(ClearType::All))?;
                }
                last_status.clear();
                // The screen was wiped; same-width layouts still need the page back.
                if !viewer.resize(fresh.container_metrics(device_pixel_ratio)) {
                    viewer.repaint();
                }
            }
            UiEvent::OpenOriginal => {
                if let Some(actions) = viewer.fallback() {
                    notice = Some(match open_external(&actions.open_url) {
                        Ok(()) => format!("opened {}", actions.open_url),
                        Err(err) => {
                            warn!(?err, "failed to open original");
                            format!("could not open {}: {err}", actions.open_url)
                        }
                    });
                }
            }
            UiEvent::Download => {
                let url = viewer.download_url().to_string();
                notice = Some(match download(&url).await {
                    Ok(path) => format!("saved {}", path.display()),
                    Err(err) => {
                        warn!(?err, "download failed");
                        format!("download failed: {err}")
                    }
                });
            }
            UiEvent::Quit => break,
            UiEvent::None => {}
        }
    }

    if let Some(task) = pending.take() {
        task.abort();
    }
    let mut out = stdout.lock();
    write!(out, "\u{1b}_Ga=d,q=2\u{1b}\\")?;
    crossterm::execute!(&mut *out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

fn start_load(
    viewer: &mut PdfViewer,
    loader: Arc<PdfiumLoader>,
    timeout: Option<Duration>,
) -> PendingLoad {
    let ticket = viewer.begin_load();
    tokio::spawn(async move {
        let result = load_document(loader.as_ref(), ticket.source(), timeout).await;
        (ticket, result)
    })
}

fn current_layout() -> Result<TerminalLayout> {
    let window = terminal::window_size()?;
    Ok(TerminalLayout::from_window(
        window.columns,
        window.rows,
        window.width,
        window.height,
    ))
}

fn status_text(viewer: &PdfViewer, pending_input: Option<&str>, notice: Option<&str>) -> String {
    let mut status = match viewer.status() {
        ViewerStatus::Loading => format!("{} – loading…", viewer.title()),
        ViewerStatus::Ready => {
            let mut label = viewer.accessible_label();
            let surface = viewer.surface_status();
            for marker in render_markers(surface.as_ref()) {
                label.push_str(" | ");
                label.push_str(&marker);
            }
            label
        }
        ViewerStatus::Error(err) => format!(
            "Unable to load PDF ({err}). [o] open in browser  [d] download  [q] quit"
        ),
    };
    for extra in [pending_input, notice].into_iter().flatten() {
        if !extra.is_empty() {
            status.push_str(" | ");
            status.push_str(extra);
        }
    }
    status
}

/// Notes about the page area: shown until a frame is up and while a newer
/// one is on its way, plus a running count of failed renders.
fn render_markers(surface: Option<&SurfaceStatus>) -> Vec<String> {
    let Some(surface) = surface else {
        return vec!["rendering…".to_string()];
    };
    let mut markers = Vec::new();
    if !surface.is_rendered() || surface.state != SchedulerState::Idle {
        markers.push("rendering…".to_string());
    }
    match surface.failures {
        0 => {}
        1 => markers.push("1 render failure".to_string()),
        n => markers.push(format!("{n} render failures")),
    }
    markers
}

fn draw_status(
    stdout: &Mutex<Stdout>,
    layout: &Mutex<TerminalLayout>,
    status: &str,
) -> Result<()> {
    let layout = *layout.lock();
    let text = truncate_with_ellipsis(status.to_string(), layout.total_columns as usize);
    let mut out = stdout.lock();
    write_status_line(&mut *out, layout.status_row(), &text)?;
    Ok(())
}

fn truncate_with_ellipsis(mut text: String, width: usize) -> String {
    if text.chars().count() <= width {
        return text;
    }
    if width == 0 {
        return String::new();
    }
    let keep = width - 1;
    if let Some((index, _)) = text.char_indices().nth(keep) {
        text.truncate(index);
    }
    text.push('…');
    text
}

fn open_external(target: &str) -> Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        Process::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Process::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Process::new("xdg-open")
    };
    command
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to launch a handler for {target}"))?;
    Ok(())
}

async fn download(source: &str) -> Result<PathBuf> {
    let bytes = fetch_source(source).await?;
    let path = std::env::current_dir()?.join(suggested_file_name(source));
    fs::write(&path, bytes).with_context(|| format!("failed to write {:?}", path))?;
    info!(path = %path.display(), "saved copy of document");
    Ok(path)
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "deckview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal is in raw mode drawing images; logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
