//! Scripted in-memory browser used by the integration tests
//!
//! Screenshots are solid-colour PNGs whose width is a tenth of the requested
//! viewport width. Selectors drive failures: `#missing` errors, `#hang`
//! never completes and `#panic` panics the worker.
//! Closing and capturing can be scripted to hang or fail as well.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use serde_json::Value;

use pixl_engine::{
    Action, BrowserDriver, BrowserSession, Page, PageAction, PixlError, PixlResult, RunConfig, Viewport,
};

#[derive(Default)]
pub struct FakeState {
    pub launched: AtomicUsize,
    pub closed: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub fail_launch: AtomicBool,
    pub fail_navigation: AtomicBool,
    pub hang_close: AtomicBool,
    failing_width: Mutex<Option<u32>>,
    pub calls: Mutex<Vec<String>>,
    color: Mutex<Option<[u8; 4]>>,
    screenshot_delay: Mutex<Duration>,
}

impl FakeState {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn color(&self) -> [u8; 4] {
        self.color.lock().unwrap().unwrap_or([40, 120, 200, 255])
    }
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub state: Arc<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paint every later screenshot with `color`
    pub fn paint(&self, color: [u8; 4]) {
        *self.state.color.lock().unwrap() = Some(color);
    }

    /// Hold every screenshot for `delay` so workers overlap
    pub fn slow_screenshots(&self, delay: Duration) {
        *self.state.screenshot_delay.lock().unwrap() = delay;
    }

    pub fn fail_launches(&self) {
        self.state.fail_launch.store(true, Ordering::SeqCst);
    }

    pub fn fail_navigation(&self) {
        self.state.fail_navigation.store(true, Ordering::SeqCst);
    }

    /// Sessions never finish closing
    pub fn hang_on_close(&self) {
        self.state.hang_close.store(true, Ordering::SeqCst);
    }

    /// Screenshots at `width` error out
    pub fn fail_screenshots_at(&self, width: u32) {
        *self.state.failing_width.lock().unwrap() = Some(width);
    }

    pub fn driver(&self) -> Arc<dyn BrowserDriver> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn launch(&self, headless: bool) -> PixlResult<Box<dyn BrowserSession>> {
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(PixlError::BrowserLaunch("scripted launch failure".to_string()));
        }
        self.state.record(format!("launch:{}", headless));
        self.state.launched.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<FakeState>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn new_page(&self) -> PixlResult<Box<dyn Page>> {
        Ok(Box::new(FakePage {
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> PixlResult<()> {
        self.state.record("close");
        if self.state.hang_close.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePage {
    state: Arc<FakeState>,
}

impl FakePage {
    async fn interact(&self, call: String, selector: &str) -> PixlResult<()> {
        self.state.record(call);
        match selector {
            "#missing" => Err(PixlError::Browser(format!("no element matches {}", selector))),
            "#hang" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            "#panic" => panic!("scripted worker panic"),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Page for FakePage {
    async fn set_default_timeout(&self, timeout: Duration) -> PixlResult<()> {
        self.state.record(format!("timeout:{}", timeout.as_millis()));
        Ok(())
    }

    async fn goto(&self, url: &str) -> PixlResult<()> {
        self.state.record(format!("goto:{}", url));
        if self.state.fail_navigation.load(Ordering::SeqCst) {
            return Err(PixlError::Browser(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
        }
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> PixlResult<Value> {
        self.state.record("evaluate");
        Ok(Value::Null)
    }

    async fn click(&self, selector: &str) -> PixlResult<()> {
        self.interact(format!("click:{}", selector), selector).await
    }

    async fn fill(&self, selector: &str, value: &str) -> PixlResult<()> {
        self.interact(format!("fill:{}={}", selector, value), selector).await
    }

    async fn type_text(&self, selector: &str, text: &str) -> PixlResult<()> {
        self.interact(format!("type:{}={}", selector, text), selector).await
    }

    async fn press_key(&self, key: &str) -> PixlResult<()> {
        self.state.record(format!("press:{}", key));
        Ok(())
    }

    async fn hover(&self, selector: &str) -> PixlResult<()> {
        self.interact(format!("hover:{}", selector), selector).await
    }

    async fn focus(&self, selector: &str) -> PixlResult<()> {
        self.interact(format!("focus:{}", selector), selector).await
    }

    async fn select_option(&self, selector: &str, value: &str) -> PixlResult<()> {
        self.interact(format!("select:{}={}", selector, value), selector).await
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Option<Duration>) -> PixlResult<()> {
        self.interact(format!("wait:{}", selector), selector).await
    }

    async fn mouse_move(&self, x: f64, y: f64) -> PixlResult<()> {
        self.state.record(format!("mouse:{},{}", x, y));
        Ok(())
    }

    async fn screenshot(&self, width: u32) -> PixlResult<Vec<u8>> {
        self.state.record(format!("screenshot:{}", width));
        let delay = *self.state.screenshot_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.state.failing_width.lock().unwrap() == Some(width) {
            return Err(PixlError::Browser(format!("capture at {}px crashed", width)));
        }
        Ok(solid_png(width / 10, 20, self.state.color()))
    }
}

pub fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width.max(1), height, Rgba(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// Config writing into `dir` with two viewports and no settle delay
pub fn config(dir: &Path) -> RunConfig {
    RunConfig {
        timeout_ms: 500,
        stabilise_delay_ms: 0,
        viewports: vec![Viewport::new("desktop", 1440), Viewport::new("mobile", 375)],
        output_directory: dir.to_path_buf(),
        url: Some("https://example.test/".to_string()),
        ..RunConfig::default()
    }
}

pub fn click(selector: &str) -> Arc<dyn Action> {
    Arc::new(PageAction::Click {
        selector: selector.to_string(),
    })
}
