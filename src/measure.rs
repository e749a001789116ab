//! Dimension analyzer: reconciles the host's size candidates into extents

use crate::geometry::{DocumentExtent, ViewportExtent};
use crate::host::{PageHost, PageMetrics};
use crate::{Error, Result};
use log::{debug, warn};

/// Measures document and viewport extents once per run.
#[derive(Debug, Clone, Copy)]
pub struct DimensionAnalyzer {
    /// Used when the host cannot report a usable viewport at all
    fallback_viewport: ViewportExtent,
}

impl DimensionAnalyzer {
    pub fn new(fallback_viewport: ViewportExtent) -> Self {
        Self { fallback_viewport }
    }

    /// Measure the page. Never fails: on any measurement error the page is
    /// treated as exactly one viewport and a warning is logged.
    pub fn measure<H: PageHost + ?Sized>(&self, host: &H) -> (DocumentExtent, ViewportExtent) {
        match host.read_metrics().and_then(|m| reconcile(&m)) {
            Ok((doc, vp)) => {
                debug!(
                    "measured document {}x{} viewport {}x{}",
                    doc.width, doc.height, vp.width, vp.height
                );
                (doc, vp)
            }
            Err(e) => {
                let vp = host
                    .read_metrics()
                    .ok()
                    .and_then(|m| viewport_of(&m))
                    .unwrap_or(self.fallback_viewport);
                warn!("{}; treating page as a single {}x{} viewport", e, vp.width, vp.height);
                (DocumentExtent::new(vp.width, vp.height), vp)
            }
        }
    }
}

impl Default for DimensionAnalyzer {
    fn default() -> Self {
        Self::new(ViewportExtent::default())
    }
}

fn viewport_of(m: &PageMetrics) -> Option<ViewportExtent> {
    if m.viewport_width > 0 && m.viewport_height > 0 {
        Some(ViewportExtent::new(
            clamp_u32(m.viewport_width),
            clamp_u32(m.viewport_height),
        ))
    } else {
        None
    }
}

/// Per axis, take the largest candidate not suppressed by overflow-hidden
/// styling; non-positive results fall back to the viewport.
pub fn reconcile(m: &PageMetrics) -> Result<(DocumentExtent, ViewportExtent)> {
    let vp = viewport_of(m).ok_or_else(|| {
        Error::Measurement(format!(
            "non-positive viewport {}x{}",
            m.viewport_width, m.viewport_height
        ))
    })?;

    let width = axis_extent(
        [m.scroll_width, m.body_scroll_width, m.offset_width],
        m.overflow_x_hidden,
        vp.width,
    );
    let height = axis_extent(
        [m.scroll_height, m.body_scroll_height, m.offset_height],
        m.overflow_y_hidden,
        vp.height,
    );

    Ok((DocumentExtent::new(width, height), vp))
}

fn axis_extent(candidates: [i64; 3], hidden: bool, viewport: u32) -> u32 {
    if hidden {
        return viewport;
    }
    let best = candidates
        .iter()
        .copied()
        .chain(std::iter::once(viewport as i64))
        .max()
        .unwrap_or(0);
    if best <= 0 {
        viewport
    } else {
        clamp_u32(best)
    }
}

fn clamp_u32(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sw: i64, sh: i64, vw: i64, vh: i64) -> PageMetrics {
        PageMetrics {
            scroll_width: sw,
            scroll_height: sh,
            viewport_width: vw,
            viewport_height: vh,
            ..Default::default()
        }
    }

    #[test]
    fn takes_largest_candidate_per_axis() {
        let mut m = metrics(1000, 2400, 1000, 800);
        m.body_scroll_height = 2600;
        m.offset_width = 1020;
        let (doc, vp) = reconcile(&m).unwrap();
        assert_eq!(doc, DocumentExtent::new(1020, 2600));
        assert_eq!(vp, ViewportExtent::new(1000, 800));
    }

    #[test]
    fn overflow_hidden_axis_collapses_to_viewport() {
        let mut m = metrics(3000, 2400, 1000, 800);
        m.overflow_x_hidden = true;
        let (doc, _) = reconcile(&m).unwrap();
        assert_eq!(doc.width, 1000);
        assert_eq!(doc.height, 2400);
    }

    #[test]
    fn non_positive_candidates_fall_back_to_viewport() {
        let m = metrics(-5, 0, 640, 480);
        let (doc, _) = reconcile(&m).unwrap();
        assert_eq!(doc, DocumentExtent::new(640, 480));
    }

    #[test]
    fn broken_viewport_is_a_measurement_error() {
        let m = metrics(1000, 1000, 0, 480);
        assert!(matches!(reconcile(&m), Err(Error::Measurement(_))));
    }

    struct FailingHost;

    impl PageHost for FailingHost {
        fn read_metrics(&self) -> Result<PageMetrics> {
            Err(Error::Host("document detached".into()))
        }
        fn scroll_to(&mut self, _x: u32, _y: u32) -> Result<()> {
            Ok(())
        }
        fn scroll_position(&self) -> Result<(u32, u32)> {
            Ok((0, 0))
        }
    }

    #[test]
    fn measure_falls_back_to_single_viewport() {
        let analyzer = DimensionAnalyzer::new(ViewportExtent::new(800, 600));
        let (doc, vp) = analyzer.measure(&FailingHost);
        assert_eq!(vp, ViewportExtent::new(800, 600));
        assert_eq!(doc, DocumentExtent::new(800, 600));
    }
}
