//! pagestitch: full-page screenshot capture and stitching
//!
//! A "capture visible area" primitive can only photograph what fits in the
//! viewport. This crate produces one coherent image of a document larger
//! than the viewport by scrolling through it in a planned order, capturing
//! each slice, and compositing the slices into one or more bounded output
//! rasters.
//!
//! # Pipeline
//!
//! - **Dimension analysis** ([`measure`]): reconcile the host's size
//!   candidates into document and viewport extents
//! - **Tile planning** ([`planner`]): gap-free, row-major tiles with an
//!   optional vertical overlap for sticky headers
//! - **Capture orchestration** ([`orchestrator`]): scroll, settle, capture
//!   with per-attempt timeout and retries, strictly one tile at a time
//! - **Compositing** ([`compositor`]): draw tiles onto canvases that respect
//!   host size limits, last write wins in overlaps
//! - **Packaging** ([`packager`]): encode canvases as PNG/JPEG artifacts and
//!   hand them to a sink
//!
//! The host (browser tab, extension content script, test double) is injected
//! through the traits in [`host`].
//!
//! # Example
//!
//! ```no_run
//! use pagestitch::host::{MemorySink, SyntheticPage};
//! use pagestitch::{CaptureConfig, DocumentExtent, FullPageCapture, ViewportExtent};
//!
//! # async fn run() -> pagestitch::Result<()> {
//! let page = SyntheticPage::new(DocumentExtent::new(1280, 4000), ViewportExtent::new(1280, 720));
//! let mut capture = FullPageCapture::new(page.clone(), page, CaptureConfig::default())?;
//! let mut sink = MemorySink::default();
//! let report = capture.run(&mut sink).await?;
//! println!("{} tiles, {} artifacts", report.tiles.len(), report.artifacts.len());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod error;
pub use error::{CaptureError, Error, Result};

pub mod compositor;
pub mod geometry;
pub mod host;
pub mod measure;
pub mod orchestrator;
pub mod packager;
pub mod pipeline;
pub mod planner;

// CDP host adapter (headless Chrome)
#[cfg(feature = "cdp")]
pub mod cdp;

pub use compositor::{CanvasLimits, CompositeCanvas, Compositor};
pub use geometry::{DocumentExtent, Rect, Tile, ViewportExtent};
pub use orchestrator::{AbortSignal, CaptureAttempt, CaptureOrchestrator, CapturedTile, TileState};
pub use packager::FinalArtifact;
pub use pipeline::{FullPageCapture, RunReport, RunState};

/// Raster encoding of captures and artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(Error::ConfigError(format!("unknown image format '{}'", other))),
        }
    }
}

/// Delay policy between capture attempts of the same tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Always wait `retry_delay_ms`
    #[default]
    Fixed,
    /// Wait `retry_delay_ms * 2^(attempt - 1)`
    Exponential,
}

/// Configuration for a full-page capture run
///
/// The defaults favour completeness over speed: a generous per-attempt
/// timeout, three attempts per tile and a settle delay long enough for lazy
/// images to land.
///
/// # Examples
///
/// ```
/// let cfg = pagestitch::CaptureConfig::default();
/// assert_eq!(cfg.max_attempts, 3);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Encoding of the final artifacts (and of the requested captures)
    pub format: ImageFormat,
    /// Encoder quality, 1-100; only JPEG uses it
    pub quality: u8,
    /// Pixels of vertical overlap between consecutive tile rows
    pub overlap_px: u32,
    /// Pause after each scroll before capturing, in milliseconds
    pub settle_delay_ms: u64,
    /// Shortened pause used when the scroll barely moved
    pub settle_min_ms: u64,
    /// Movement (px, per axis) below which the shortened pause applies
    pub settle_tolerance_px: u32,
    /// Timeout for a single capture call, in milliseconds
    pub attempt_timeout_ms: u64,
    /// Capture attempts per tile before the run fails
    pub max_attempts: u32,
    /// Base delay between attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// How the retry delay grows
    pub backoff: Backoff,
    /// Optional budget for the whole run, in milliseconds
    pub run_timeout_ms: Option<u64>,
    /// Hide scrollbars / freeze animations while capturing
    pub neutralize_styles: bool,
    /// Host-imposed output canvas limits
    pub limits: CanvasLimits,
    /// Opaque RGBA fill painted under every canvas
    pub background: [u8; 4],
    /// Viewport assumed when the host cannot report one
    pub fallback_viewport: ViewportExtent,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: 100,
            overlap_px: 0,
            settle_delay_ms: 250,
            settle_min_ms: 50,
            settle_tolerance_px: 2,
            attempt_timeout_ms: 15_000,
            max_attempts: 3,
            retry_delay_ms: 500,
            backoff: Backoff::Fixed,
            run_timeout_ms: None,
            neutralize_styles: true,
            limits: CanvasLimits::default(),
            background: [255, 255, 255, 255],
            fallback_viewport: ViewportExtent::default(),
        }
    }
}

impl CaptureConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: CaptureConfig = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid config JSON: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(Error::ConfigError(format!(
                "quality must be within 1-100, got {}",
                self.quality
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::ConfigError("max_attempts must be at least 1".into()));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(Error::ConfigError("attempt_timeout_ms must be positive".into()));
        }
        if self.settle_min_ms > self.settle_delay_ms {
            return Err(Error::ConfigError(
                "settle_min_ms must not exceed settle_delay_ms".into(),
            ));
        }
        if self.limits.max_dimension == 0 || self.limits.max_area == 0 {
            return Err(Error::ConfigError("canvas limits must be positive".into()));
        }
        if self.background[3] != 255 {
            return Err(Error::ConfigError("background must be opaque".into()));
        }
        Ok(())
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failures so far.
    pub fn retry_delay(&self, attempt: u32) -> std::time::Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.retry_delay_ms,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.retry_delay_ms.saturating_mul(1u64 << shift)
            }
        };
        std::time::Duration::from_millis(ms)
    }
}

/// Run a full-page capture with the given host, device and sink.
///
/// Convenience wrapper over [`FullPageCapture`]; pass an [`AbortSignal`] to
/// cancel between tiles.
pub async fn capture_full_page<H, D, S>(
    host: H,
    device: D,
    sink: &mut S,
    config: CaptureConfig,
    abort: Option<AbortSignal>,
) -> Result<RunReport>
where
    H: host::PageHost,
    D: host::CaptureDevice,
    S: host::ArtifactSink,
{
    let mut capture = FullPageCapture::new(host, device, config)?;
    if let Some(signal) = abort {
        capture = capture.with_abort_signal(signal);
    }
    capture.run(sink).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.attempt_timeout_ms, 15_000);
        assert_eq!(config.format, ImageFormat::Png);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        let cfg = CaptureConfig { quality: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(Error::ConfigError(_))));
        let cfg = CaptureConfig { quality: 101, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_from_partial_json() {
        let cfg = CaptureConfig::from_json(r#"{"format":"jpeg","quality":80,"overlap_px":40}"#).unwrap();
        assert_eq!(cfg.format, ImageFormat::Jpeg);
        assert_eq!(cfg.quality, 80);
        assert_eq!(cfg.overlap_px, 40);
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn config_json_is_validated() {
        assert!(CaptureConfig::from_json(r#"{"quality":0}"#).is_err());
        assert!(CaptureConfig::from_json("not json").is_err());
    }

    #[test]
    fn exponential_backoff_doubles() {
        let cfg = CaptureConfig {
            retry_delay_ms: 100,
            backoff: Backoff::Exponential,
            ..Default::default()
        };
        assert_eq!(cfg.retry_delay(1).as_millis(), 100);
        assert_eq!(cfg.retry_delay(2).as_millis(), 200);
        assert_eq!(cfg.retry_delay(3).as_millis(), 400);
    }

    #[test]
    fn format_parsing() {
        assert_eq!("JPG".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert!("gif".parse::<ImageFormat>().is_err());
    }
}
