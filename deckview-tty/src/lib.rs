use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    queue,
    terminal::{Clear, ClearType},
};
use deckview_core::{ContainerMetrics, DrawSurface, Frame, PixelSize, RenderImage, ViewerCommand};
use parking_lot::Mutex;
use png::{BitDepth, ColorType, Encoder};
use tracing::trace;

const CHUNK_SIZE: usize = 4096;
/// Cell size assumed when the terminal does not report its pixel size.
const FALLBACK_CELL: CellMetrics = CellMetrics {
    width_px: 8.0,
    height_px: 16.0,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub width_px: f32,
    pub height_px: f32,
}

/// Where on screen the page may be placed, in cells, plus the cell size.
/// The last row is reserved for the status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalLayout {
    pub total_columns: u32,
    pub total_rows: u32,
    pub cell: CellMetrics,
    pub origin_column: u32,
    pub origin_row: u32,
    pub columns: u32,
    pub rows: u32,
}

impl TerminalLayout {
    /// `width_px`/`height_px` are the window's pixel size; zero means unknown.
    pub fn from_window(columns: u16, rows: u16, width_px: u16, height_px: u16) -> Self {
        let total_columns = u32::from(columns).max(1);
        let total_rows = u32::from(rows).max(1);
        let cell = if width_px > 0 && height_px > 0 {
            CellMetrics {
                width_px: f32::from(width_px) / total_columns as f32,
                height_px: f32::from(height_px) / total_rows as f32,
            }
        } else {
            FALLBACK_CELL
        };

        let image_rows = total_rows.saturating_sub(1).max(1);
        let margin_columns = total_columns.min(2);
        let margin_rows = image_rows.min(2);
        Self {
            total_columns,
            total_rows,
            cell,
            origin_column: margin_columns / 2,
            origin_row: margin_rows / 2,
            columns: total_columns.saturating_sub(margin_columns).max(1),
            rows: image_rows.saturating_sub(margin_rows).max(1),
        }
    }

    pub fn status_row(&self) -> u16 {
        u16::try_from(self.total_rows.saturating_sub(1)).unwrap_or(u16::MAX)
    }

    /// What the viewer sees as its container. Terminal pixels are already
    /// device pixels, hence the ratio passed in.
    pub fn container_metrics(&self, device_pixel_ratio: f32) -> ContainerMetrics {
        ContainerMetrics {
            container_width_px: self.columns as f32 * self.cell.width_px,
            window_width_px: self.total_columns as f32 * self.cell.width_px,
            device_pixel_ratio,
        }
    }

    /// Cells covered by an image displayed at `displayed` pixels, shrunk
    /// with its aspect ratio kept when it does not fit the area.
    pub fn placement(&self, displayed: PixelSize) -> (u32, u32) {
        let max_columns = self.columns.max(1);
        let max_rows = self.rows.max(1);
        if displayed.width == 0 || displayed.height == 0 {
            return (max_columns, max_rows);
        }

        let mut width = displayed.width as f32;
        let mut height = displayed.height as f32;
        let area_width = max_columns as f32 * self.cell.width_px;
        let area_height = max_rows as f32 * self.cell.height_px;
        let shrink = (area_width / width).min(area_height / height);
        if shrink.is_finite() && shrink < 1.0 {
            width *= shrink;
            height *= shrink;
        }

        let columns = (width / self.cell.width_px).round().max(1.0) as u32;
        let rows = (height / self.cell.height_px).round().max(1.0) as u32;
        (columns.min(max_columns), rows.min(max_rows))
    }
}

/// Draws frames with the kitty graphics protocol. Each frame is written as
/// one buffer under the writer lock so it never interleaves with the status
/// line.
pub struct KittySurface<W: Write + Send> {
    writer: Arc<Mutex<W>>,
    layout: Arc<Mutex<TerminalLayout>>,
    image_id: u32,
    placement_id: u32,
}

impl<W: Write + Send> KittySurface<W> {
    pub fn new(writer: Arc<Mutex<W>>, layout: Arc<Mutex<TerminalLayout>>) -> Self {
        Self {
            writer,
            layout,
            image_id: 1,
            placement_id: 1,
        }
    }

    fn encode_frame(&self, frame: &Frame, layout: &TerminalLayout) -> Result<Vec<u8>> {
        let (columns, rows) = layout.placement(frame.geometry.displayed);
        let mut out = Vec::new();
        write!(out, "\u{1b}[?2026h")?;
        queue!(
            out,
            cursor::MoveTo(
                u16::try_from(layout.origin_column).unwrap_or(0),
                u16::try_from(layout.origin_row).unwrap_or(0)
            )
        )?;
        write_image(
            &mut out,
            &frame.image,
            self.image_id,
            self.placement_id,
            columns,
            rows,
        )?;
        write!(out, "\u{1b}[?2026l")?;
        trace!(columns, rows, bytes = out.len(), "encoded kitty frame");
        Ok(out)
    }
}

impl<W: Write + Send> DrawSurface for KittySurface<W> {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        let layout = *self.layout.lock();
        let payload = self.encode_frame(frame, &layout)?;
        let mut writer = self.writer.lock();
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut writer = self.writer.lock();
        write!(writer, "\u{1b}_Ga=d,d=i,i={},q=2\u{1b}\\", self.image_id)?;
        writer.flush()?;
        Ok(())
    }
}

fn write_image(
    out: &mut Vec<u8>,
    image: &RenderImage,
    image_id: u32,
    placement_id: u32,
    columns: u32,
    rows: u32,
) -> Result<()> {
    let expected = image.width as usize * image.height as usize * 4;
    if image.pixels.len() != expected {
        return Err(anyhow!(
            "bitmap is {} bytes, expected {} for {}x{}",
            image.pixels.len(),
            expected,
            image.width,
            image.height
        ));
    }

    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;

    let encoded = BASE64.encode(&buffer);
    let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
    let mut first = true;
    while let Some(chunk) = chunks.next() {
        let more = u8::from(chunks.peek().is_some());
        if first {
            write!(
                out,
                "\u{1b}_Ga=T,f=100,C=1,q=2,i={image_id},p={placement_id},c={columns},r={rows},s={},v={},z=-1,m={more}",
                image.width, image.height,
            )?;
            first = false;
        } else {
            write!(out, "\u{1b}_Gm={more},q=2")?;
        }
        out.push(b';');
        out.extend_from_slice(chunk);
        write!(out, "\u{1b}\\")?;
    }
    Ok(())
}

pub fn write_status_line<W: Write>(writer: &mut W, row: u16, label: &str) -> io::Result<()> {
    queue!(writer, cursor::MoveTo(0, row), Clear(ClearType::CurrentLine))?;
    write!(writer, "{}", label)?;
    writer.flush()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Command(ViewerCommand),
    Resize { columns: u16, rows: u16 },
    OpenOriginal,
    Download,
    Quit,
    None,
}

/// Turns terminal events into viewer actions. Digits typed before `g` or
/// Enter select a page.
#[derive(Debug, Default)]
pub struct KeyMapper {
    pending_page: Option<usize>,
    pending_digits: String,
}

impl KeyMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                kind: KeyEventKind::Release,
                ..
            }) => UiEvent::None,
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => self.map_key(code, modifiers),
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            _ => UiEvent::None,
        }
    }

    fn map_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Enter, _) => {
                let page = self.take_page().unwrap_or(1);
                UiEvent::Command(ViewerCommand::GotoPage { page })
            }
            (KeyCode::Home, _) => self.command(ViewerCommand::GotoPage { page: 1 }),
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                self.command(ViewerCommand::GotoPage { page: usize::MAX })
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Char('l'), KeyModifiers::NONE)
            | (KeyCode::Char(' '), _)
            | (KeyCode::Right, _)
            | (KeyCode::Down, _)
            | (KeyCode::PageDown, _) => self.command(ViewerCommand::NextPage),
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Char('h'), KeyModifiers::NONE)
            | (KeyCode::Left, _)
            | (KeyCode::Up, _)
            | (KeyCode::PageUp, _)
            | (KeyCode::Backspace, _) => self.command(ViewerCommand::PrevPage),
            (KeyCode::Char('o'), KeyModifiers::NONE) => {
                self.reset_page();
                UiEvent::OpenOriginal
            }
            (KeyCode::Char('d'), KeyModifiers::NONE) => {
                self.reset_page();
                UiEvent::Download
            }
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                self.reset_page();
                UiEvent::Quit
            }
            _ => {
                self.reset_page();
                UiEvent::None
            }
        }
    }

    fn command(&mut self, command: ViewerCommand) -> UiEvent {
        self.reset_page();
        UiEvent::Command(command)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_page.unwrap_or(0);
        self.pending_page = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_page(&mut self) -> Option<usize> {
        let page = self.pending_page.take().filter(|&page| page > 0);
        self.pending_digits.clear();
        page
    }

    fn reset_page(&mut self) {
        self.pending_page = None;
        self.pending_digits.clear();
    }

    /// Digits typed so far, for echoing in the status line.
    pub fn pending_input(&self) -> Option<&str> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(&self.pending_digits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;
    use deckview_core::{RenderRequest, SurfaceGeometry};

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn layout() -> TerminalLayout {
        // 100x40 cells of 10x20 pixels.
        TerminalLayout::from_window(100, 40, 1000, 800)
    }

    fn frame(displayed: PixelSize) -> Frame {
        Frame {
            request: RenderRequest {
                page: 1,
                container_width_px: 980.0,
                device_pixel_ratio: 1.0,
                padding_px: 32.0,
            },
            geometry: SurfaceGeometry {
                scale: 1.0,
                viewport: deckview_core::LogicalSize {
                    width: displayed.width as f32,
                    height: displayed.height as f32,
                },
                backing: PixelSize {
                    width: 1,
                    height: 1,
                },
                displayed,
                device_pixel_ratio: 1.0,
            },
            image: RenderImage {
                width: 1,
                height: 1,
                pixels: vec![255, 0, 0, 255],
            },
        }
    }

    #[test]
    fn layout_reserves_status_row_and_margins() {
        let layout = layout();
        assert_eq!(layout.cell.width_px, 10.0);
        assert_eq!(layout.cell.height_px, 20.0);
        assert_eq!((layout.columns, layout.rows), (98, 37));
        assert_eq!((layout.origin_column, layout.origin_row), (1, 1));
        assert_eq!(layout.status_row(), 39);

        let metrics = layout.container_metrics(1.0);
        assert_eq!(metrics.container_width_px, 980.0);
        assert_eq!(metrics.window_width_px, 1000.0);
    }

    #[test]
    fn unknown_pixel_size_falls_back_to_default_cells() {
        let layout = TerminalLayout::from_window(80, 24, 0, 0);
        assert_eq!(layout.cell, FALLBACK_CELL);
    }

    #[test]
    fn placement_keeps_fitting_image_size() {
        let placement = layout().placement(PixelSize {
            width: 400,
            height: 300,
        });
        assert_eq!(placement, (40, 15));
    }

    #[test]
    fn tall_page_is_shrunk_to_fit_rows() {
        // 37 rows * 20px = 740px of height available.
        let (columns, rows) = layout().placement(PixelSize {
            width: 900,
            height: 1480,
        });
        assert_eq!(rows, 37);
        assert_eq!(columns, 45);
    }

    #[test]
    fn row_only_resize_keeps_metrics_but_moves_placement() {
        let tall = TerminalLayout::from_window(100, 40, 1000, 800);
        let short = TerminalLayout::from_window(100, 20, 1000, 400);
        assert_eq!(tall.container_metrics(1.0), short.container_metrics(1.0));

        let page = PixelSize {
            width: 600,
            height: 450,
        };
        assert_ne!(tall.placement(page), short.placement(page));
    }

    #[test]
    fn kitty_present_emits_protocol() {
        let writer = Arc::new(Mutex::new(Vec::new()));
        let mut surface = KittySurface::new(writer.clone(), Arc::new(Mutex::new(layout())));

        surface
            .present(&frame(PixelSize {
                width: 400,
                height: 300,
            }))
            .unwrap();
        let output = String::from_utf8(writer.lock().clone()).unwrap();
        assert!(output.starts_with("\u{1b}[?2026h"));
        assert!(output.contains("\u{1b}_Ga=T,f=100,C=1,q=2,i=1,p=1,c=40,r=15,s=1,v=1,z=-1,m=0;"));
        assert!(output.ends_with("\u{1b}\\\u{1b}[?2026l"));
    }

    #[test]
    fn mismatched_bitmap_is_not_presented() {
        let writer = Arc::new(Mutex::new(Vec::new()));
        let mut surface = KittySurface::new(writer.clone(), Arc::new(Mutex::new(layout())));
        let mut broken = frame(PixelSize {
            width: 10,
            height: 10,
        });
        broken.image.width = 3;

        assert!(surface.present(&broken).is_err());
        assert!(writer.lock().is_empty());
    }

    #[test]
    fn clear_deletes_the_image() {
        let writer = Arc::new(Mutex::new(Vec::new()));
        let mut surface = KittySurface::new(writer.clone(), Arc::new(Mutex::new(layout())));
        surface.clear().unwrap();
        assert_eq!(
            writer.lock().as_slice(),
            b"\x1b_Ga=d,d=i,i=1,q=2\x1b\\".as_slice()
        );
    }

    #[test]
    fn navigation_keys_map_to_commands() {
        let mut mapper = KeyMapper::new();
        for code in [
            KeyCode::Char('j'),
            KeyCode::Char(' '),
            KeyCode::Right,
            KeyCode::Down,
            KeyCode::PageDown,
        ] {
            assert_eq!(
                mapper.map_event(key_event(code)),
                UiEvent::Command(ViewerCommand::NextPage)
            );
        }
        for code in [
            KeyCode::Char('k'),
            KeyCode::Left,
            KeyCode::Up,
            KeyCode::PageUp,
        ] {
            assert_eq!(
                mapper.map_event(key_event(code)),
                UiEvent::Command(ViewerCommand::PrevPage)
            );
        }
    }

    #[test]
    fn digits_then_g_jumps_to_page() {
        let mut mapper = KeyMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::None);
        assert_eq!(mapper.pending_input(), Some("12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('g'))),
            UiEvent::Command(ViewerCommand::GotoPage { page: 12 })
        );
        assert!(mapper.pending_input().is_none());

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('g'))),
            UiEvent::Command(ViewerCommand::GotoPage { page: 1 })
        );
    }

    #[test]
    fn other_keys_drop_pending_digits() {
        let mut mapper = KeyMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Command(ViewerCommand::NextPage)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::Command(ViewerCommand::GotoPage { page: 1 })
        );
    }

    #[test]
    fn fallback_and_exit_keys() {
        let mut mapper = KeyMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('o'))),
            UiEvent::OpenOriginal
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('d'))),
            UiEvent::Download
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::Quit);
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('c'),
                KeyModifiers::CONTROL
            )),
            UiEvent::Quit
        );
    }

    #[test]
    fn resize_and_release_events() {
        let mut mapper = KeyMapper::new();
        assert_eq!(
            mapper.map_event(Event::Resize(120, 40)),
            UiEvent::Resize {
                columns: 120,
                rows: 40
            }
        );
        let release = Event::Key(KeyEvent {
            code: KeyCode::Char('j'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        });
        assert_eq!(mapper.map_event(release), UiEvent::None);
    }
}
