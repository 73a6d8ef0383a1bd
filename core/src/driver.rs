use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::scenario::Viewport;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("waiting for selector '{selector}' failed after {timeout_ms}ms: {message}")]
    WaitTimeout {
        selector: String,
        timeout_ms: u64,
        message: String,
    },
    #[error("interaction with '{selector}' failed: {message}")]
    Interaction { selector: String, message: String },
    #[error("screenshot capture failed: {0}")]
    Capture(String),
}

/// Seam between the runtime and the browser-automation backend. One driver
/// drives exactly one page; it is never reused once its check ends.
pub trait PageDriver {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError>;
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError>;
    fn pause(&mut self, duration: Duration);
    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), DriverError>;
    fn click(&mut self, selector: &str) -> Result<(), DriverError>;
    fn select_value(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;
    fn capture_png(&mut self) -> Result<Vec<u8>, DriverError>;
}

/// Launches one driver per check so sessions are owned exclusively.
pub trait DriverFactory {
    type Driver: PageDriver;

    fn launch(&self, viewport: Viewport) -> Result<Self::Driver, DriverError>;
}

/// Headless Chromium session backed by the DevTools protocol. The browser
/// process is torn down when the session drops, which covers every exit path
/// of a check, failed interactions included.
pub struct ChromeSession {
    // Owns the browser process; dropping it closes the session.
    _browser: Browser,
    tab: Arc<Tab>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeFactory;

impl DriverFactory for ChromeFactory {
    type Driver = ChromeSession;

    fn launch(&self, viewport: Viewport) -> Result<ChromeSession, DriverError> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((viewport.width, viewport.height)))
            .build()
            .map_err(|err| DriverError::Launch(err.to_string()))?;
        let browser = Browser::new(options).map_err(|err| DriverError::Launch(err.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|err| DriverError::Launch(err.to_string()))?;
        Ok(ChromeSession {
            _browser: browser,
            tab,
        })
    }
}

impl PageDriver for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|err| DriverError::Navigation {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        Ok(())
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|err| DriverError::WaitTimeout {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
                message: err.to_string(),
            })?;
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), DriverError> {
        self.tab
            .set_bounds(Bounds::Normal {
                left: None,
                top: None,
                width: Some(f64::from(viewport.width)),
                height: Some(f64::from(viewport.height)),
            })
            .map_err(|err| DriverError::Interaction {
                selector: format!("viewport {viewport}"),
                message: err.to_string(),
            })?;
        Ok(())
    }

    fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        self.tab
            .find_element(selector)
            .and_then(|element| element.click().map(|_| ()))
            .map_err(|err| DriverError::Interaction {
                selector: selector.to_string(),
                message: err.to_string(),
            })?;
        Ok(())
    }

    fn select_value(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        // Sets the control value and fires a bubbling change event, which is
        // what a user-driven <select> change produces.
        let expression = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             el.value = {val}; el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }})()",
            sel = js_string(selector),
            val = js_string(value),
        );
        let result = self
            .tab
            .evaluate(&expression, false)
            .map_err(|err| DriverError::Interaction {
                selector: selector.to_string(),
                message: err.to_string(),
            })?;

        match result.value {
            Some(serde_json::Value::Bool(true)) => Ok(()),
            _ => Err(DriverError::Interaction {
                selector: selector.to_string(),
                message: "no element matched the selector".to_string(),
            }),
        }
    }

    fn capture_png(&mut self) -> Result<Vec<u8>, DriverError> {
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|err| DriverError::Capture(err.to_string()))
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
