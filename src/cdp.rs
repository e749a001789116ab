//! Chrome DevTools Protocol host adapter
//!
//! Implements [`PageHost`] and [`CaptureDevice`] over a headless Chrome tab
//! (the `headless_chrome` crate). Scroll, geometry and style control are
//! plain `Runtime.evaluate` calls; captures use `Page.captureScreenshot` of
//! the visible viewport only, so the stitching logic runs exactly as it would
//! inside a browser extension.

use crate::error::CaptureError;
use crate::geometry::ViewportExtent;
use crate::host::{CaptureDevice, PageHost, PageMetrics, Raster};
use crate::{Error, ImageFormat, Result};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

const STYLE_ID: &str = "__pagestitch_capture_style";

const CAPTURE_CSS: &str = "html{scrollbar-width:none!important}\
::-webkit-scrollbar{display:none!important}\
*,*::before,*::after{animation-play-state:paused!important;transition:none!important;caret-color:transparent!important}";

const METRICS_JS: &str = r#"
(function() {
    const root = document.documentElement;
    const body = document.body || root;
    const style = getComputedStyle(root);
    return JSON.stringify({
        sw: root.scrollWidth, sh: root.scrollHeight,
        bw: body.scrollWidth, bh: body.scrollHeight,
        ow: root.offsetWidth, oh: root.offsetHeight,
        vw: window.innerWidth, vh: window.innerHeight,
        hx: style.overflowX === 'hidden', hy: style.overflowY === 'hidden'
    });
})()
"#;

/// A launched browser with one tab.
pub struct CdpSession {
    // Keeps the browser process alive for as long as the tab is used.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl CdpSession {
    pub fn launch(viewport: ViewportExtent) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((viewport.width, viewport.height)))
            .build()
            .map_err(|e| Error::Host(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::Host(format!("Failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| Error::Host(format!("Failed to create tab: {}", e)))?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Navigate and wait for the page to stabilize.
    pub async fn open(&self, url: &str) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url)
                .map_err(|e| Error::Host(format!("Navigation failed: {}", e)))?;
            tab.wait_until_navigated()
                .map_err(|e| Error::Host(format!("Wait for navigation failed: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Host(format!("navigation task failed: {}", e)))??;
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    pub fn host(&self) -> CdpPage {
        CdpPage {
            tab: self.tab.clone(),
        }
    }

    /// Capture device whose screenshot calls give up after `attempt_timeout`
    /// on the Chrome side as well.
    pub fn device(&self, attempt_timeout: Duration) -> CdpCapture {
        self.tab.set_default_timeout(attempt_timeout);
        CdpCapture {
            tab: self.tab.clone(),
            calls: BlockingCalls::default(),
        }
    }
}

/// Scroll/geometry/style control over a tab
pub struct CdpPage {
    tab: Arc<Tab>,
}

impl CdpPage {
    fn eval(&self, script: &str) -> Result<Option<serde_json::Value>> {
        let obj = self.tab.evaluate(script, false)?;
        Ok(obj.value)
    }

    fn eval_json(&self, script: &str) -> Result<serde_json::Value> {
        let value = self
            .eval(script)?
            .ok_or_else(|| Error::Host("No value returned from evaluation".into()))?;
        let text = value
            .as_str()
            .ok_or_else(|| Error::Host(format!("Expected a JSON string, got {}", value)))?;
        serde_json::from_str(text).map_err(|e| Error::Host(format!("Invalid JSON from page: {}", e)))
    }
}

fn int(v: &serde_json::Value, key: &str) -> i64 {
    v.get(key).and_then(|x| x.as_f64()).map(|f| f.round() as i64).unwrap_or(0)
}

impl PageHost for CdpPage {
    fn read_metrics(&self) -> Result<PageMetrics> {
        let v = self.eval_json(METRICS_JS)?;
        Ok(PageMetrics {
            scroll_width: int(&v, "sw"),
            scroll_height: int(&v, "sh"),
            body_scroll_width: int(&v, "bw"),
            body_scroll_height: int(&v, "bh"),
            offset_width: int(&v, "ow"),
            offset_height: int(&v, "oh"),
            viewport_width: int(&v, "vw"),
            viewport_height: int(&v, "vh"),
            overflow_x_hidden: v.get("hx").and_then(|x| x.as_bool()).unwrap_or(false),
            overflow_y_hidden: v.get("hy").and_then(|x| x.as_bool()).unwrap_or(false),
        })
    }

    fn scroll_to(&mut self, x: u32, y: u32) -> Result<()> {
        self.eval(&format!("window.scrollTo({}, {})", x, y))?;
        Ok(())
    }

    fn scroll_position(&self) -> Result<(u32, u32)> {
        let v = self.eval_json("JSON.stringify([window.scrollX, window.scrollY])")?;
        let at = |i: usize| {
            v.get(i)
                .and_then(|x| x.as_f64())
                .map(|f| f.max(0.0).round() as u32)
                .unwrap_or(0)
        };
        Ok((at(0), at(1)))
    }

    fn apply_capture_styles(&mut self) -> Result<()> {
        let script = format!(
            r#"(function() {{
                if (document.getElementById('{id}')) return;
                const s = document.createElement('style');
                s.id = '{id}';
                s.textContent = '{css}';
                document.documentElement.appendChild(s);
            }})()"#,
            id = STYLE_ID,
            css = CAPTURE_CSS
        );
        self.eval(&script)?;
        Ok(())
    }

    fn restore_styles(&mut self) {
        let script = format!(
            "(function() {{ const s = document.getElementById('{}'); if (s) s.remove(); }})()",
            STYLE_ID
        );
        if let Err(e) = self.eval(&script) {
            debug!("restore_styles failed: {}", e);
        }
    }
}

/// Runs blocking calls one at a time. A call whose caller stopped waiting
/// (attempt timeout) is joined before the next one starts, so at most one
/// call is ever in flight.
struct BlockingCalls<T> {
    in_flight: Option<JoinHandle<T>>,
}

impl<T> Default for BlockingCalls<T> {
    fn default() -> Self {
        Self { in_flight: None }
    }
}

impl<T: Send + 'static> BlockingCalls<T> {
    async fn run<F>(&mut self, f: F) -> std::result::Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if let Some(abandoned) = self.in_flight.take() {
            debug!("waiting for abandoned capture call to finish");
            if let Err(e) = abandoned.await {
                debug!("abandoned capture call failed: {}", e);
            }
        }
        let handle = self.in_flight.insert(tokio::task::spawn_blocking(f));
        let out = handle.await;
        self.in_flight = None;
        out
    }
}

type ScreenshotResult = std::result::Result<Vec<u8>, String>;

/// Visible-viewport screenshots of a tab
pub struct CdpCapture {
    tab: Arc<Tab>,
    calls: BlockingCalls<ScreenshotResult>,
}

impl CaptureDevice for CdpCapture {
    async fn capture_visible_area(
        &mut self,
        format: ImageFormat,
        quality: u8,
    ) -> std::result::Result<Raster, CaptureError> {
        let tab = self.tab.clone();
        let (cdp_format, cdp_quality) = match format {
            ImageFormat::Png => (Page::CaptureScreenshotFormatOption::Png, None),
            ImageFormat::Jpeg => (Page::CaptureScreenshotFormatOption::Jpeg, Some(quality as u32)),
        };

        // headless_chrome blocks the calling thread until Chrome answers.
        let data = self
            .calls
            .run(move || {
                tab.capture_screenshot(cdp_format, cdp_quality, None, true)
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| CaptureError::Transport(format!("capture task failed: {}", e)))?
            .map_err(|e| CaptureError::Transport(format!("Screenshot failed: {}", e)))?;

        Ok(Raster::new(format, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn abandoned_call_is_joined_before_the_next() {
        let mut calls = BlockingCalls::default();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let slow = calls.run(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
            true
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), slow).await.is_err());

        let flag = finished.clone();
        let saw_previous_finish = calls.run(move || flag.load(Ordering::SeqCst)).await.unwrap();
        assert!(saw_previous_finish);
    }
}
