//! Capture orchestrator: scroll, settle and capture each tile in order
//!
//! The viewport scroll position is a single shared resource, so tiles are
//! captured strictly one at a time. Each tile walks
//! `Pending -> Scrolling -> Settling -> Capturing -> Captured | Failed`.
//! Retryable capture errors are absorbed here; a tile that exhausts its
//! attempts fails the whole run. The original scroll position is restored on
//! every exit path by [`ScrollGuard`].

use crate::error::CaptureError;
use crate::geometry::{Tile, ViewportExtent};
use crate::host::{CaptureDevice, PageHost, Raster};
use crate::{CaptureConfig, Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::io::Cursor;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cooperative cancellation flag, checked only between tiles.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a single planned tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileState {
    Pending,
    Scrolling,
    Settling,
    Capturing,
    Captured,
    Failed,
}

/// Outcome class of a failed capture attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureErrorKind {
    Timeout,
    Transport,
    EmptyResponse,
}

impl From<&CaptureError> for CaptureErrorKind {
    fn from(e: &CaptureError) -> Self {
        match e {
            CaptureError::Timeout(_) => CaptureErrorKind::Timeout,
            CaptureError::Transport(_) => CaptureErrorKind::Transport,
            CaptureError::EmptyResponse => CaptureErrorKind::EmptyResponse,
        }
    }
}

/// One capture call for one tile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureAttempt {
    pub tile_index: usize,
    /// 1-based attempt number
    pub attempt: u32,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    /// `None` when the attempt succeeded
    pub error: Option<CaptureErrorKind>,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// A tile together with the snapshot that covers it.
#[derive(Debug, Clone)]
pub struct CapturedTile {
    pub tile: Tile,
    pub raster: Raster,
    pub captured_at: DateTime<Utc>,
    /// Where the viewport actually was when the raster was taken. Differs
    /// from the tile origin when the host clamps scrolling at the page end.
    pub scroll_x: u32,
    pub scroll_y: u32,
    /// Raster pixels per CSS pixel, constant across a run
    pub scale: f64,
}

/// Restores the host scroll position (and capture styles, when it applied
/// them) when dropped, whatever way the run ends.
pub struct ScrollGuard<'a, H: PageHost + ?Sized> {
    host: &'a mut H,
    origin: (u32, u32),
    styles_applied: bool,
}

impl<'a, H: PageHost + ?Sized> ScrollGuard<'a, H> {
    /// Remember the current scroll position.
    pub fn new(host: &'a mut H) -> Result<Self> {
        let origin = host.scroll_position()?;
        Ok(Self {
            host,
            origin,
            styles_applied: false,
        })
    }

    /// Apply capture styles; they are reverted together with the scroll.
    pub fn apply_capture_styles(&mut self) -> Result<()> {
        self.host.apply_capture_styles()?;
        self.styles_applied = true;
        Ok(())
    }

    pub fn origin(&self) -> (u32, u32) {
        self.origin
    }
}

impl<H: PageHost + ?Sized> Deref for ScrollGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.host
    }
}

impl<H: PageHost + ?Sized> DerefMut for ScrollGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.host
    }
}

impl<H: PageHost + ?Sized> Drop for ScrollGuard<'_, H> {
    fn drop(&mut self) {
        if self.styles_applied {
            self.host.restore_styles();
        }
        let (x, y) = self.origin;
        if let Err(e) = self.host.scroll_to(x, y) {
            warn!("failed to restore scroll position ({}, {}): {}", x, y, e);
        }
    }
}

/// Drives the per-tile capture loop.
pub struct CaptureOrchestrator<'c> {
    config: &'c CaptureConfig,
    viewport: ViewportExtent,
    abort: AbortSignal,
    states: Vec<TileState>,
    attempts: Vec<CaptureAttempt>,
    scale: Option<f64>,
}

impl<'c> CaptureOrchestrator<'c> {
    pub fn new(config: &'c CaptureConfig, viewport: ViewportExtent, abort: AbortSignal) -> Self {
        Self {
            config,
            viewport,
            abort,
            states: Vec::new(),
            attempts: Vec::new(),
            scale: None,
        }
    }

    pub fn tile_states(&self) -> &[TileState] {
        &self.states
    }

    pub fn attempts(&self) -> &[CaptureAttempt] {
        &self.attempts
    }

    /// Run-wide scale factor, known once the first tile is captured.
    pub fn scale(&self) -> Option<f64> {
        self.scale
    }

    /// Capture every tile in order.
    ///
    /// Fails with `CaptureFailure` when a tile runs out of attempts, `Decode`
    /// when a raster header is unreadable, `Composition` when a raster does
    /// not match the run scale, and `Aborted` when the signal is raised
    /// between tiles. The scroll position is restored in all cases.
    pub async fn run<H, D>(
        &mut self,
        host: &mut H,
        device: &mut D,
        tiles: &[Tile],
    ) -> Result<Vec<CapturedTile>>
    where
        H: PageHost + ?Sized,
        D: CaptureDevice + ?Sized,
    {
        self.states = vec![TileState::Pending; tiles.len()];
        self.attempts.clear();

        let mut guard = ScrollGuard::new(host)?;
        let mut last_pos = guard.origin();
        let mut captured = Vec::with_capacity(tiles.len());

        for tile in tiles {
            if self.abort.is_aborted() {
                info!("capture aborted after {} of {} tiles", captured.len(), tiles.len());
                return Err(Error::Aborted {
                    captured: captured.len(),
                    planned: tiles.len(),
                });
            }

            match self.capture_tile(&mut *guard, device, tile, last_pos).await {
                Ok(ct) => {
                    last_pos = (ct.scroll_x, ct.scroll_y);
                    self.states[tile.index] = TileState::Captured;
                    captured.push(ct);
                }
                Err(e) => {
                    self.states[tile.index] = TileState::Failed;
                    return Err(e);
                }
            }
        }

        // The end of the plan is a tile boundary too.
        if self.abort.is_aborted() {
            return Err(Error::Aborted {
                captured: captured.len(),
                planned: tiles.len(),
            });
        }
        Ok(captured)
    }

    async fn capture_tile<H, D>(
        &mut self,
        host: &mut H,
        device: &mut D,
        tile: &Tile,
        last_pos: (u32, u32),
    ) -> Result<CapturedTile>
    where
        H: PageHost + ?Sized,
        D: CaptureDevice + ?Sized,
    {
        self.states[tile.index] = TileState::Scrolling;
        host.scroll_to(tile.origin_x, tile.origin_y)?;
        let (sx, sy) = host.scroll_position()?;

        self.states[tile.index] = TileState::Settling;
        let settle = self.settle_delay(last_pos, (sx, sy));
        debug!(
            "tile {} at ({}, {}) scrolled to ({}, {}), settling {:?}",
            tile.index, tile.origin_x, tile.origin_y, sx, sy, settle
        );
        tokio::time::sleep(settle).await;

        self.states[tile.index] = TileState::Capturing;
        let raster = self.capture_with_retry(device, tile.index).await?;

        let (raster_width, _) = probe_dimensions(&raster).map_err(|reason| Error::Decode {
            tile_index: tile.index,
            reason,
        })?;
        let scale = self.discover_scale(tile.index, raster_width)?;

        Ok(CapturedTile {
            tile: *tile,
            raster,
            captured_at: Utc::now(),
            scroll_x: sx,
            scroll_y: sy,
            scale,
        })
    }

    fn settle_delay(&self, from: (u32, u32), to: (u32, u32)) -> Duration {
        let tol = self.config.settle_tolerance_px;
        if from.0.abs_diff(to.0) <= tol && from.1.abs_diff(to.1) <= tol {
            Duration::from_millis(self.config.settle_min_ms)
        } else {
            Duration::from_millis(self.config.settle_delay_ms)
        }
    }

    async fn capture_with_retry<D>(&mut self, device: &mut D, tile_index: usize) -> Result<Raster>
    where
        D: CaptureDevice + ?Sized,
    {
        let timeout_ms = self.config.attempt_timeout_ms;
        let first = self.attempts.len();

        for attempt in 1..=self.config.max_attempts {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                device.capture_visible_area(self.config.format, self.config.quality),
            )
            .await
            {
                Ok(Ok(raster)) if raster.is_empty() => Err(CaptureError::EmptyResponse),
                Ok(res) => res,
                Err(_) => Err(CaptureError::Timeout(timeout_ms)),
            };

            self.attempts.push(CaptureAttempt {
                tile_index,
                attempt,
                latency: started.elapsed(),
                error: outcome.as_ref().err().map(CaptureErrorKind::from),
            });

            match outcome {
                Ok(raster) => return Ok(raster),
                Err(e) if attempt < self.config.max_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        "tile {} attempt {}/{} failed: {}; retrying in {:?}",
                        tile_index, attempt, self.config.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("tile {} attempt {} failed: {}; giving up", tile_index, attempt, e);
                }
            }
        }

        Err(Error::CaptureFailure {
            tile_index,
            attempts: self.attempts[first..].to_vec(),
        })
    }

    /// The first captured tile fixes the scale for the whole run. A later
    /// raster whose width disagrees with it by more than a pixel (zoom or
    /// display change mid-run) fails that tile.
    fn discover_scale(&mut self, tile_index: usize, raster_width: u32) -> Result<f64> {
        let viewport_width = self.viewport.width.max(1) as f64;
        match self.scale {
            Some(scale) => {
                let expected = scale * viewport_width;
                if (raster_width as f64 - expected).abs() > 1.0 {
                    return Err(Error::Composition(format!(
                        "tile {} raster is {} px wide, expected {:.0} px at run scale {:.3}",
                        tile_index, raster_width, expected, scale
                    )));
                }
                Ok(scale)
            }
            None => {
                let observed = raster_width as f64 / viewport_width;
                if (observed - 1.0).abs() > f64::EPSILON {
                    info!("capture scale is {:.3} (device pixel ratio or zoom)", observed);
                }
                self.scale = Some(observed);
                Ok(observed)
            }
        }
    }
}

/// Read raster dimensions from the encoded header without decoding pixels.
pub(crate) fn probe_dimensions(raster: &Raster) -> std::result::Result<(u32, u32), String> {
    image::ImageReader::new(Cursor::new(&raster.data))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DocumentExtent;
    use crate::host::{CaptureBehavior, SyntheticPage};
    use crate::planner::plan;

    fn quick_config() -> CaptureConfig {
        CaptureConfig {
            settle_delay_ms: 10,
            settle_min_ms: 1,
            retry_delay_ms: 5,
            ..Default::default()
        }
    }

    #[test]
    fn abort_signal_is_shared() {
        let a = AbortSignal::new();
        let b = a.clone();
        b.abort();
        assert!(a.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn captures_all_tiles_in_order() {
        let page = SyntheticPage::new(DocumentExtent::new(100, 250), ViewportExtent::new(100, 100));
        let tiles = plan(DocumentExtent::new(100, 250), ViewportExtent::new(100, 100), 0);
        let cfg = quick_config();
        let mut orch = CaptureOrchestrator::new(&cfg, ViewportExtent::new(100, 100), AbortSignal::new());

        let mut host = page.clone();
        let mut device = page.clone();
        let captured = orch.run(&mut host, &mut device, &tiles).await.unwrap();

        assert_eq!(captured.len(), 3);
        assert!(orch.tile_states().iter().all(|s| *s == TileState::Captured));
        // last tile scroll is clamped to the bottom of the page
        assert_eq!((captured[2].scroll_x, captured[2].scroll_y), (0, 150));
        assert_eq!(orch.scale(), Some(1.0));
        assert_eq!(page.scroll_position().unwrap(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let page = SyntheticPage::new(DocumentExtent::new(100, 100), ViewportExtent::new(100, 100));
        page.script(vec![
            CaptureBehavior::Transport("port closed".into()),
            CaptureBehavior::Empty,
            CaptureBehavior::Succeed,
        ]);
        let tiles = plan(DocumentExtent::new(100, 100), ViewportExtent::new(100, 100), 0);
        let cfg = quick_config();
        let mut orch = CaptureOrchestrator::new(&cfg, ViewportExtent::new(100, 100), AbortSignal::new());

        let (mut host, mut device) = (page.clone(), page.clone());
        let captured = orch.run(&mut host, &mut device, &tiles).await.unwrap();

        assert_eq!(captured.len(), 1);
        let kinds: Vec<_> = orch.attempts().iter().map(|a| a.error).collect();
        assert_eq!(
            kinds,
            vec![
                Some(CaptureErrorKind::Transport),
                Some(CaptureErrorKind::EmptyResponse),
                None
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_raster_is_not_retried() {
        let page = SyntheticPage::new(DocumentExtent::new(100, 100), ViewportExtent::new(100, 100));
        page.script(vec![CaptureBehavior::Corrupt]);
        let tiles = plan(DocumentExtent::new(100, 100), ViewportExtent::new(100, 100), 0);
        let cfg = quick_config();
        let mut orch = CaptureOrchestrator::new(&cfg, ViewportExtent::new(100, 100), AbortSignal::new());

        let (mut host, mut device) = (page.clone(), page.clone());
        let err = orch.run(&mut host, &mut device, &tiles).await.unwrap_err();

        assert!(matches!(err, Error::Decode { tile_index: 0, .. }));
        assert_eq!(orch.attempts().len(), 1);
        assert_eq!(orch.tile_states(), &[TileState::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_is_fixed_by_first_tile() {
        let page = SyntheticPage::new(DocumentExtent::new(50, 120), ViewportExtent::new(50, 50))
            .with_device_pixel_ratio(2.0);
        let tiles = plan(DocumentExtent::new(50, 120), ViewportExtent::new(50, 50), 0);
        let cfg = quick_config();
        let mut orch = CaptureOrchestrator::new(&cfg, ViewportExtent::new(50, 50), AbortSignal::new());

        let (mut host, mut device) = (page.clone(), page.clone());
        let captured = orch.run(&mut host, &mut device, &tiles).await.unwrap();

        assert_eq!(orch.scale(), Some(2.0));
        assert!(captured.iter().all(|c| c.scale == 2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn zoom_change_mid_run_fails_the_tile() {
        let page = SyntheticPage::new(DocumentExtent::new(50, 120), ViewportExtent::new(50, 50))
            .with_device_pixel_ratio(2.0);
        page.set_device_pixel_ratio_after(1, 1.0);
        let tiles = plan(DocumentExtent::new(50, 120), ViewportExtent::new(50, 50), 0);
        let cfg = quick_config();
        let mut orch = CaptureOrchestrator::new(&cfg, ViewportExtent::new(50, 50), AbortSignal::new());

        let (mut host, mut device) = (page.clone(), page.clone());
        let err = orch.run(&mut host, &mut device, &tiles).await.unwrap_err();

        match err {
            Error::Composition(msg) => assert!(msg.contains("tile 1"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(orch.tile_states()[1], TileState::Failed);
        assert_eq!(page.scroll_position().unwrap(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_is_shortened_when_scroll_does_not_move() {
        let page = SyntheticPage::new(DocumentExtent::new(100, 100), ViewportExtent::new(100, 100));
        let tiles = plan(DocumentExtent::new(100, 100), ViewportExtent::new(100, 100), 0);
        let cfg = CaptureConfig {
            settle_delay_ms: 1_000,
            settle_min_ms: 10,
            ..Default::default()
        };
        let mut orch = CaptureOrchestrator::new(&cfg, ViewportExtent::new(100, 100), AbortSignal::new());

        let started = Instant::now();
        let (mut host, mut device) = (page.clone(), page.clone());
        orch.run(&mut host, &mut device, &tiles).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[test]
    fn guard_restores_scroll_on_drop() {
        let page = SyntheticPage::new(DocumentExtent::new(100, 1000), ViewportExtent::new(100, 100));
        let mut host = page.clone();
        host.scroll_to(0, 300).unwrap();
        {
            let mut guard = ScrollGuard::new(&mut host).unwrap();
            guard.apply_capture_styles().unwrap();
            guard.scroll_to(0, 700).unwrap();
            assert!(page.styles_applied());
        }
        assert_eq!(page.scroll_position().unwrap(), (0, 300));
        assert!(!page.styles_applied());
    }
}
