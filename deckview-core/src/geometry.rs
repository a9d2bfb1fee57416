//! Scale and surface sizing for a single page.
//!
//! The page is fitted to the container width (minus padding) and capped at a
//! maximum zoom. The draw surface then gets two sizes: the backing bitmap,
//! which is the viewport multiplied by the device pixel ratio, and the
//! displayed footprint, which stays in logical pixels.

use crate::{PageSize, RenderRequest};

/// Lower bound on the fitted scale so a collapsed container still yields a
/// non-empty bitmap.
pub const MIN_SCALE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalSize {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub scale: f32,
    /// Viewport at `scale` before any rounding.
    pub viewport: LogicalSize,
    /// Size of the bitmap handed to the rasterizer.
    pub backing: PixelSize,
    /// On-screen footprint in logical pixels.
    pub displayed: PixelSize,
    pub device_pixel_ratio: f32,
}

pub fn compute_scale(
    container_width_px: f32,
    padding_px: f32,
    page_natural_width: f32,
    max_scale: f32,
) -> f32 {
    if !page_natural_width.is_finite() || page_natural_width <= 0.0 {
        return 1.0_f32.min(max_scale);
    }
    let available_width = (container_width_px - padding_px).max(1.0);
    (available_width / page_natural_width)
        .min(max_scale)
        .max(MIN_SCALE)
}

pub fn surface_geometry(page: PageSize, scale: f32, device_pixel_ratio: f32) -> SurfaceGeometry {
    let ratio = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
        device_pixel_ratio
    } else {
        1.0
    };
    let viewport = LogicalSize {
        width: page.width * scale,
        height: page.height * scale,
    };
    SurfaceGeometry {
        scale,
        viewport,
        backing: PixelSize {
            width: floor_px(viewport.width * ratio),
            height: floor_px(viewport.height * ratio),
        },
        displayed: PixelSize {
            width: floor_px(viewport.width),
            height: floor_px(viewport.height),
        },
        device_pixel_ratio: ratio,
    }
}

pub fn layout_page(request: &RenderRequest, page: PageSize, max_scale: f32) -> SurfaceGeometry {
    let scale = compute_scale(
        request.container_width_px,
        request.padding_px,
        page.width,
        max_scale,
    );
    surface_geometry(page, scale, request.device_pixel_ratio)
}

fn floor_px(value: f32) -> u32 {
    if !value.is_finite() || value < 1.0 {
        1
    } else if value >= u32::MAX as f32 {
        u32::MAX
    } else {
        value.floor() as u32
    }
}
