//! Compositor: stitches captured tiles into bounded output canvases
//!
//! Canvases are allocated lazily from the first tile, because only a real
//! capture reveals the pixel scale. When the scaled output exceeds the
//! host's canvas limits it is split into a grid of canvases. Tiles are drawn
//! in capture order onto every canvas they intersect; later tiles overwrite
//! earlier ones where they overlap.

use crate::geometry::{scale_edge, Rect};
use crate::orchestrator::CapturedTile;
use crate::{Error, Result};
use image::imageops::FilterType;
use image::{GenericImage, Rgba, RgbaImage};
use log::debug;
use serde::{Deserialize, Serialize};

/// Edge rounding tolerated between a raster and its planned region, in pixels
const ROUNDING_SLACK_PX: i64 = 1;

/// Largest canvas the host can allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasLimits {
    /// Maximum width or height of one canvas, in pixels
    pub max_dimension: u32,
    /// Maximum width * height of one canvas
    pub max_area: u64,
}

impl Default for CanvasLimits {
    fn default() -> Self {
        // Chromium's canvas limits
        Self {
            max_dimension: 32_767,
            max_area: 268_435_456,
        }
    }
}

/// One output raster and the region of scaled document space it owns.
#[derive(Debug, Clone)]
pub struct CompositeCanvas {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
    pub buffer: RgbaImage,
}

impl CompositeCanvas {
    fn new(rect: Rect, background: Rgba<u8>) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
            buffer: RgbaImage::from_pixel(rect.width() as u32, rect.height() as u32, background),
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.left, self.top, self.right, self.bottom)
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }
}

/// Split a `width` x `height` pixel area into a row-major grid of
/// rectangles, each within `limits`.
pub fn partition(width: u64, height: u64, limits: CanvasLimits) -> Vec<Rect> {
    let width = width.max(1);
    let height = height.max(1);
    let max_dim = (limits.max_dimension as u64).max(1);
    let max_area = limits.max_area.max(1);

    let col_limit = max_dim.min(max_area);
    let cols = width.div_ceil(col_limit);
    let col_w = width.div_ceil(cols);

    let row_limit = max_dim.min(max_area / col_w).max(1);
    let rows = height.div_ceil(row_limit);
    let row_h = height.div_ceil(rows);

    let mut out = Vec::with_capacity((rows * cols) as usize);
    for r in 0..rows {
        for c in 0..cols {
            let left = c * col_w;
            let top = r * row_h;
            out.push(Rect::new(
                left as i64,
                top as i64,
                (left + col_w).min(width) as i64,
                (top + row_h).min(height) as i64,
            ));
        }
    }
    out
}

/// Incremental compositor; feed tiles in capture order, then `finish`.
pub struct Compositor {
    extent: Rect,
    limits: CanvasLimits,
    background: Rgba<u8>,
    scale: Option<f64>,
    canvases: Vec<CompositeCanvas>,
    drawn: usize,
}

impl Compositor {
    /// `extent` is the document-space region to reproduce (normally the
    /// bounds of the tile plan).
    pub fn new(extent: Rect, limits: CanvasLimits, background: [u8; 4]) -> Self {
        Self {
            extent,
            limits,
            background: Rgba(background),
            scale: None,
            canvases: Vec::new(),
            drawn: 0,
        }
    }

    pub fn scale(&self) -> Option<f64> {
        self.scale
    }

    fn ensure_canvases(&mut self, scale: f64) -> Result<f64> {
        match self.scale {
            Some(s) if (s - scale).abs() > f64::EPSILON => Err(Error::Composition(format!(
                "tile scale {:.3} does not match run scale {:.3}",
                scale, s
            ))),
            Some(s) => Ok(s),
            None => {
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(Error::Composition(format!("invalid scale {}", scale)));
                }
                let px = self.extent.scaled(scale);
                let rects = partition(px.width(), px.height(), self.limits);
                debug!(
                    "allocating {} canvas(es) for {}x{} px at scale {:.3}",
                    rects.len(),
                    px.width(),
                    px.height(),
                    scale
                );
                self.canvases = rects
                    .into_iter()
                    .map(|r| CompositeCanvas::new(r, self.background))
                    .collect();
                self.scale = Some(scale);
                Ok(scale)
            }
        }
    }

    /// Decode one captured tile and draw its planned region.
    pub fn draw(&mut self, captured: &CapturedTile) -> Result<()> {
        let tile_index = captured.tile.index;
        let scale = self.ensure_canvases(captured.scale)?;

        let raster = image::load_from_memory(&captured.raster.data)
            .map_err(|e| Error::Decode {
                tile_index,
                reason: e.to_string(),
            })?
            .to_rgba8();

        // Where the raster sits in scaled document space.
        let origin_x = scale_edge(captured.scroll_x as i64, scale);
        let origin_y = scale_edge(captured.scroll_y as i64, scale);
        let available = Rect::new(
            origin_x,
            origin_y,
            origin_x + raster.width() as i64,
            origin_y + raster.height() as i64,
        );

        // Edge rounding at fractional scales may leave the raster one pixel
        // short of the planned region; anything more is missing content.
        let wanted = captured.tile.rect().scaled(scale);
        let shortfall = [
            available.left - wanted.left,
            available.top - wanted.top,
            wanted.right - available.right,
            wanted.bottom - available.bottom,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        if shortfall > ROUNDING_SLACK_PX {
            return Err(Error::Composition(format!(
                "tile {} raster covers ({}, {})-({}, {}) but ({}, {})-({}, {}) was planned",
                tile_index,
                available.left,
                available.top,
                available.right,
                available.bottom,
                wanted.left,
                wanted.top,
                wanted.right,
                wanted.bottom
            )));
        }

        for canvas in &mut self.canvases {
            let Some(region) = wanted.intersect(&canvas.rect()) else {
                continue;
            };
            // Slide the source window inside the raster to absorb the slack.
            let src_w = (region.width() as i64).min(raster.width() as i64);
            let src_h = (region.height() as i64).min(raster.height() as i64);
            let src_x = (region.left - origin_x).clamp(0, raster.width() as i64 - src_w);
            let src_y = (region.top - origin_y).clamp(0, raster.height() as i64 - src_h);
            let mut part = image::imageops::crop_imm(
                &raster,
                src_x as u32,
                src_y as u32,
                src_w as u32,
                src_h as u32,
            )
            .to_image();
            let (dst_w, dst_h) = (region.width() as u32, region.height() as u32);
            if part.dimensions() != (dst_w, dst_h) {
                part = image::imageops::resize(&part, dst_w, dst_h, FilterType::Nearest);
            }
            canvas
                .buffer
                .copy_from(
                    &part,
                    (region.left - canvas.left) as u32,
                    (region.top - canvas.top) as u32,
                )
                .map_err(|e| Error::Composition(format!("tile {}: {}", tile_index, e)))?;
        }

        self.drawn += 1;
        Ok(())
    }

    /// Hand over the canvases. Fails when nothing was drawn.
    pub fn finish(self) -> Result<Vec<CompositeCanvas>> {
        if self.drawn == 0 {
            return Err(Error::Composition("no tiles were drawn".into()));
        }
        Ok(self.canvases)
    }
}

/// Composite `tiles` (in capture order) covering `extent`.
pub fn composite(
    tiles: &[CapturedTile],
    extent: Rect,
    limits: CanvasLimits,
    background: [u8; 4],
) -> Result<Vec<CompositeCanvas>> {
    let mut compositor = Compositor::new(extent, limits, background);
    for tile in tiles {
        compositor.draw(tile)?;
    }
    compositor.finish()
}
