//! Host ports: the primitives the pipeline consumes from the page it captures
//!
//! The pipeline never talks to a browser directly. Scroll control, geometry
//! reads and style toggles go through [`PageHost`]; viewport snapshots go
//! through [`CaptureDevice`]; finished artifacts leave through
//! [`ArtifactSink`]. Backends implement these traits (see `cdp` for headless
//! Chrome) and tests use the deterministic [`SyntheticPage`].

pub mod sink;
pub mod synthetic;

pub use sink::{DirectorySink, MemorySink};
pub use synthetic::{CaptureBehavior, SyntheticPage};

use crate::error::CaptureError;
use crate::packager::FinalArtifact;
use crate::{ImageFormat, Result};

/// Raw size candidates reported by the host, in CSS pixels.
///
/// Values are signed because hosts can and do report zero or negative sizes
/// for detached or collapsed roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageMetrics {
    /// `documentElement.scrollWidth` / `scrollHeight`
    pub scroll_width: i64,
    pub scroll_height: i64,
    /// `body.scrollWidth` / `scrollHeight`
    pub body_scroll_width: i64,
    pub body_scroll_height: i64,
    /// `documentElement.offsetWidth` / `offsetHeight`
    pub offset_width: i64,
    pub offset_height: i64,
    /// `innerWidth` / `innerHeight`
    pub viewport_width: i64,
    pub viewport_height: i64,
    /// Root has `overflow-x: hidden`
    pub overflow_x_hidden: bool,
    /// Root has `overflow-y: hidden`
    pub overflow_y_hidden: bool,
}

/// Encoded snapshot of the viewport as returned by the host.
///
/// The pipeline treats the payload as opaque until it probes the header for
/// dimensions and decodes it during compositing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub format: ImageFormat,
    pub data: Vec<u8>,
}

impl Raster {
    pub fn new(format: ImageFormat, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Synchronous scroll, geometry and style control over the captured page.
///
/// During a run only the capture orchestrator touches the scroll position.
pub trait PageHost {
    /// Read the current size candidates of the document and viewport.
    fn read_metrics(&self) -> Result<PageMetrics>;

    /// Scroll the viewport so its top-left corner sits at `(x, y)`.
    /// Hosts may clamp the position to the scrollable range.
    fn scroll_to(&mut self, x: u32, y: u32) -> Result<()>;

    /// Current top-left corner of the viewport in document coordinates.
    fn scroll_position(&self) -> Result<(u32, u32)>;

    /// Hide scrollbars and freeze animations for the duration of a run.
    fn apply_capture_styles(&mut self) -> Result<()> {
        Ok(())
    }

    /// Undo `apply_capture_styles`. Must be safe to call more than once.
    fn restore_styles(&mut self) {}
}

/// Asynchronous "capture visible area" primitive.
#[allow(async_fn_in_trait)]
pub trait CaptureDevice {
    /// Snapshot the current viewport in `format` (quality applies to JPEG).
    async fn capture_visible_area(
        &mut self,
        format: ImageFormat,
        quality: u8,
    ) -> std::result::Result<Raster, CaptureError>;
}

/// Destination for finished artifacts (download folder, clipboard, ...).
pub trait ArtifactSink {
    fn persist(&mut self, artifacts: &[FinalArtifact]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_raster_is_detected() {
        let r = Raster::new(ImageFormat::Png, Vec::new());
        assert!(r.is_empty());
        let r = Raster::new(ImageFormat::Png, vec![1, 2, 3]);
        assert!(!r.is_empty());
    }

    #[test]
    fn default_style_hooks_are_noops() {
        struct Fixed;
        impl PageHost for Fixed {
            fn read_metrics(&self) -> Result<PageMetrics> {
                Ok(PageMetrics::default())
            }
            fn scroll_to(&mut self, _x: u32, _y: u32) -> Result<()> {
                Ok(())
            }
            fn scroll_position(&self) -> Result<(u32, u32)> {
                Ok((0, 0))
            }
        }

        let mut host = Fixed;
        assert!(host.apply_capture_styles().is_ok());
        host.restore_styles();
        assert_eq!(host.scroll_position().unwrap(), (0, 0));
    }
}
