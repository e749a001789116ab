//! The "begin full-page capture" trigger: measure, plan, capture, stitch,
//! package.

use crate::compositor::Compositor;
use crate::geometry::{DocumentExtent, Tile, ViewportExtent};
use crate::host::{ArtifactSink, CaptureDevice, PageHost};
use crate::measure::DimensionAnalyzer;
use crate::orchestrator::{AbortSignal, CaptureAttempt, CaptureOrchestrator, ScrollGuard, TileState};
use crate::packager::{package, FinalArtifact};
use crate::planner::{plan, plan_bounds};
use crate::{CaptureConfig, Error, Result};
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::time::Duration;

/// Run-level lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    InProgress,
    Stitching,
    Done,
    Failed,
    Aborted,
}

/// Everything a successful run produced, plus diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub document: DocumentExtent,
    pub viewport: ViewportExtent,
    pub tiles: Vec<Tile>,
    pub tile_states: Vec<TileState>,
    pub attempts: Vec<CaptureAttempt>,
    /// Raster pixels per CSS pixel discovered from the first capture
    pub scale: f64,
    pub artifacts: Vec<FinalArtifact>,
    /// Whether the sink accepted the artifacts
    pub persisted: bool,
}

/// One full-page capture against a host/device pair.
///
/// ```no_run
/// # use pagestitch::host::{DirectorySink, SyntheticPage};
/// # use pagestitch::{CaptureConfig, DocumentExtent, FullPageCapture, ViewportExtent};
/// # async fn demo() -> pagestitch::Result<()> {
/// let page = SyntheticPage::new(DocumentExtent::new(800, 2400), ViewportExtent::new(800, 600));
/// let mut capture = FullPageCapture::new(page.clone(), page, CaptureConfig::default())?;
/// let cancel = capture.abort_signal();
/// // hand `cancel` to whoever may stop the run, e.g. a UI button
/// # let _ = cancel;
/// capture.run(&mut DirectorySink::new("shots")).await?;
/// # Ok(())
/// # }
/// ```
pub struct FullPageCapture<H, D> {
    host: H,
    device: D,
    config: CaptureConfig,
    analyzer: DimensionAnalyzer,
    abort: AbortSignal,
    state: RunState,
}

impl<H: PageHost, D: CaptureDevice> FullPageCapture<H, D> {
    pub fn new(host: H, device: D, config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            host,
            device,
            analyzer: DimensionAnalyzer::new(config.fallback_viewport),
            config,
            abort: AbortSignal::new(),
            state: RunState::Initializing,
        })
    }

    /// Use an externally owned cancellation signal.
    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = signal;
        self
    }

    /// Handle that cancels this run at the next tile boundary.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_parts(self) -> (H, D) {
        (self.host, self.device)
    }

    /// Run the pipeline and hand the artifacts to `sink`.
    ///
    /// On any failure no artifact reaches the sink and the page scroll
    /// position (and capture styles) are restored.
    pub async fn run<S: ArtifactSink + ?Sized>(&mut self, sink: &mut S) -> Result<RunReport> {
        self.state = RunState::Initializing;

        let result = match self.config.run_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.execute(sink))
                .await
                .unwrap_or(Err(Error::RunTimeout(ms))),
            None => self.execute(sink).await,
        };

        self.state = match &result {
            Ok(_) => RunState::Done,
            Err(e) if e.is_abort() => RunState::Aborted,
            Err(_) => RunState::Failed,
        };
        match &result {
            Ok(report) => info!(
                "full-page capture done: {} tiles, {} artifact(s)",
                report.tiles.len(),
                report.artifacts.len()
            ),
            Err(e) if e.is_abort() => info!("full-page capture cancelled: {}", e),
            Err(e) => error!("full-page capture failed: {}", e),
        }
        result
    }

    async fn execute<S: ArtifactSink + ?Sized>(&mut self, sink: &mut S) -> Result<RunReport> {
        let Self {
            host,
            device,
            config,
            analyzer,
            abort,
            state,
        } = self;

        let mut guard = ScrollGuard::new(host)?;
        if config.neutralize_styles {
            if let Err(e) = guard.apply_capture_styles() {
                warn!("could not neutralize page styles: {}", e);
            }
        }

        let (document, viewport) = analyzer.measure(&*guard);
        let tiles = plan(document, viewport, config.overlap_px);
        info!(
            "planned {} tile(s) for {}x{} document in {}x{} viewport",
            tiles.len(),
            document.width,
            document.height,
            viewport.width,
            viewport.height
        );

        *state = RunState::InProgress;
        let mut orchestrator = CaptureOrchestrator::new(config, viewport, abort.clone());
        let captured = orchestrator.run(&mut *guard, device, &tiles).await?;
        let scale = orchestrator.scale().unwrap_or(1.0);
        drop(guard);

        *state = RunState::Stitching;
        let mut compositor = Compositor::new(plan_bounds(&tiles), config.limits, config.background);
        for tile in &captured {
            compositor.draw(tile)?;
        }
        drop(captured);
        let canvases = compositor.finish()?;
        let artifacts = package(canvases, config.format, config.quality, Utc::now())?;

        let persisted = match sink.persist(&artifacts) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        };

        Ok(RunReport {
            document,
            viewport,
            tiles,
            tile_states: orchestrator.tile_states().to_vec(),
            attempts: orchestrator.attempts().to_vec(),
            scale,
            artifacts,
            persisted,
        })
    }
}
