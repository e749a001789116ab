//! Deterministic in-memory page for tests, benches and the CLI demo
//!
//! Every document pixel has a colour derived from its coordinates, so a
//! stitched image can be checked against the document it came from.
//! Optional sticky header and footer bands repaint at every scroll position,
//! and a capture script injects timeouts, transport errors and corrupt payloads.

use super::{CaptureDevice, PageHost, PageMetrics, Raster};
use crate::error::CaptureError;
use crate::geometry::{DocumentExtent, ViewportExtent};
use crate::orchestrator::AbortSignal;
use crate::{ImageFormat, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{Rgba, RgbaImage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Colour of the sticky header band
pub const HEADER_COLOR: Rgba<u8> = Rgba([200, 30, 30, 255]);

/// Colour of the sticky footer band
pub const FOOTER_COLOR: Rgba<u8> = Rgba([30, 30, 200, 255]);

/// Colour painted where the viewport extends past the document
pub const OUTSIDE_COLOR: Rgba<u8> = Rgba([240, 240, 240, 255]);

/// What the next `capture_visible_area` call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureBehavior {
    Succeed,
    /// Wait this long before answering successfully
    Hang(Duration),
    Transport(String),
    Empty,
    /// Answer with bytes that are not an image
    Corrupt,
}

#[derive(Debug)]
struct PageState {
    document: DocumentExtent,
    viewport: ViewportExtent,
    dpr: f32,
    header_height: u32,
    footer_height: u32,
    scroll: (u32, u32),
    styles_applied: bool,
    metrics_broken: bool,
    phantom_height: u32,
    scroll_log: Vec<(u32, u32)>,
    capture_calls: usize,
    successful_captures: usize,
    script: VecDeque<CaptureBehavior>,
    abort_after: Option<(usize, AbortSignal)>,
    dpr_change: Option<(usize, f32)>,
}

/// Shared handle to a synthetic page. Clones observe the same page, so one
/// clone can act as the [`PageHost`] and another as the [`CaptureDevice`].
#[derive(Debug, Clone)]
pub struct SyntheticPage {
    state: Arc<Mutex<PageState>>,
}

impl SyntheticPage {
    pub fn new(document: DocumentExtent, viewport: ViewportExtent) -> Self {
        SyntheticPage {
            state: Arc::new(Mutex::new(PageState {
                document,
                viewport,
                dpr: 1.0,
                header_height: 0,
                footer_height: 0,
                scroll: (0, 0),
                styles_applied: false,
                metrics_broken: false,
                phantom_height: 0,
                scroll_log: Vec::new(),
                capture_calls: 0,
                successful_captures: 0,
                script: VecDeque::new(),
                abort_after: None,
                dpr_change: None,
            })),
        }
    }

    pub fn with_device_pixel_ratio(self, dpr: f32) -> Self {
        self.lock().dpr = dpr;
        self
    }

    /// Paint a header of `height` CSS px that stays at the viewport top.
    pub fn with_sticky_header(self, height: u32) -> Self {
        self.lock().header_height = height;
        self
    }

    /// Paint a footer of `height` CSS px that stays at the viewport bottom.
    pub fn with_sticky_footer(self, height: u32) -> Self {
        self.lock().footer_height = height;
        self
    }

    /// Make `read_metrics` fail, as a detached document would.
    pub fn with_broken_metrics(self) -> Self {
        self.lock().metrics_broken = true;
        self
    }

    /// Report a body scroll height `extra` px taller than the page scrolls.
    pub fn with_phantom_height(self, extra: u32) -> Self {
        self.lock().phantom_height = extra;
        self
    }

    /// Queue capture behaviours; calls beyond the script succeed.
    pub fn script(&self, behaviors: Vec<CaptureBehavior>) {
        self.lock().script.extend(behaviors);
    }

    /// Raise `signal` right after the `n`-th successful capture.
    pub fn abort_after_captures(&self, n: usize, signal: AbortSignal) {
        self.lock().abort_after = Some((n, signal));
    }

    /// Switch the device pixel ratio after `n` successful captures (zoom).
    pub fn set_device_pixel_ratio_after(&self, n: usize, dpr: f32) {
        self.lock().dpr_change = Some((n, dpr));
    }

    pub fn styles_applied(&self) -> bool {
        self.lock().styles_applied
    }

    /// Every position passed to `scroll_to`, in call order.
    pub fn scroll_log(&self) -> Vec<(u32, u32)> {
        self.lock().scroll_log.clone()
    }

    pub fn capture_calls(&self) -> usize {
        self.lock().capture_calls
    }

    pub fn document(&self) -> DocumentExtent {
        self.lock().document
    }

    /// Expected colour of a document pixel (CSS px coordinates), ignoring
    /// sticky bands.
    pub fn document_color(x: u32, y: u32) -> Rgba<u8> {
        Rgba([
            (20 + (x / 3) % 200) as u8,
            (20 + (y / 3) % 200) as u8,
            (20 + ((x + y) / 7) % 200) as u8,
            255,
        ])
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        // A panicked test thread must not cascade into unrelated assertions.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_behavior(&self) -> CaptureBehavior {
        let mut st = self.lock();
        st.capture_calls += 1;
        st.script.pop_front().unwrap_or(CaptureBehavior::Succeed)
    }

    fn render_viewport(&self) -> RgbaImage {
        let st = self.lock();
        let dpr = st.dpr as f64;
        let w = ((st.viewport.width as f64) * dpr).round().max(1.0) as u32;
        let h = ((st.viewport.height as f64) * dpr).round().max(1.0) as u32;
        let (sx, sy) = st.scroll;
        let doc = st.document;
        let header = st.header_height;
        let footer_top = st.viewport.height.saturating_sub(st.footer_height);
        let has_footer = st.footer_height > 0;

        RgbaImage::from_fn(w, h, |px, py| {
            let vx = (px as f64 / dpr) as u32;
            let vy = (py as f64 / dpr) as u32;
            if vy < header {
                return HEADER_COLOR;
            }
            if has_footer && vy >= footer_top {
                return FOOTER_COLOR;
            }
            let (dx, dy) = (sx + vx, sy + vy);
            if dx >= doc.width || dy >= doc.height {
                OUTSIDE_COLOR
            } else {
                Self::document_color(dx, dy)
            }
        })
    }

    fn finish_capture(&self) {
        let mut st = self.lock();
        st.successful_captures += 1;
        let done = st.successful_captures;
        if let Some((n, dpr)) = st.dpr_change {
            if done >= n {
                st.dpr = dpr;
            }
        }
        if let Some((n, signal)) = &st.abort_after {
            if done >= *n {
                signal.abort();
            }
        }
    }
}

impl PageHost for SyntheticPage {
    fn read_metrics(&self) -> Result<PageMetrics> {
        let st = self.lock();
        if st.metrics_broken {
            return Err(crate::Error::Host("document is detached".into()));
        }
        Ok(PageMetrics {
            scroll_width: st.document.width as i64,
            scroll_height: st.document.height as i64,
            body_scroll_width: st.document.width as i64,
            body_scroll_height: (st.document.height + st.phantom_height) as i64,
            offset_width: st.viewport.width.min(st.document.width) as i64,
            offset_height: st.document.height as i64,
            viewport_width: st.viewport.width as i64,
            viewport_height: st.viewport.height as i64,
            overflow_x_hidden: false,
            overflow_y_hidden: false,
        })
    }

    fn scroll_to(&mut self, x: u32, y: u32) -> Result<()> {
        let mut st = self.lock();
        st.scroll_log.push((x, y));
        let max_x = st.document.width.saturating_sub(st.viewport.width);
        let max_y = st.document.height.saturating_sub(st.viewport.height);
        st.scroll = (x.min(max_x), y.min(max_y));
        Ok(())
    }

    fn scroll_position(&self) -> Result<(u32, u32)> {
        Ok(self.lock().scroll)
    }

    fn apply_capture_styles(&mut self) -> Result<()> {
        self.lock().styles_applied = true;
        Ok(())
    }

    fn restore_styles(&mut self) {
        self.lock().styles_applied = false;
    }
}

impl CaptureDevice for SyntheticPage {
    async fn capture_visible_area(
        &mut self,
        format: ImageFormat,
        quality: u8,
    ) -> std::result::Result<Raster, CaptureError> {
        match self.next_behavior() {
            CaptureBehavior::Succeed => {}
            CaptureBehavior::Hang(d) => tokio::time::sleep(d).await,
            CaptureBehavior::Transport(msg) => return Err(CaptureError::Transport(msg)),
            CaptureBehavior::Empty => return Ok(Raster::new(format, Vec::new())),
            CaptureBehavior::Corrupt => {
                return Ok(Raster::new(format, b"definitely not an image".to_vec()))
            }
        }

        let img = self.render_viewport();
        let mut data = Vec::new();
        let encoded = match format {
            ImageFormat::Png => img.write_with_encoder(PngEncoder::new(&mut data)),
            ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(img)
                .to_rgb8()
                .write_with_encoder(JpegEncoder::new_with_quality(&mut data, quality)),
        };
        encoded.map_err(|e| CaptureError::Transport(format!("encode failed: {}", e)))?;

        self.finish_capture();
        Ok(Raster::new(format, data))
    }
}
