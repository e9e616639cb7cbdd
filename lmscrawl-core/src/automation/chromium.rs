use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{ChromiumSection, CrawlerConfig};

use super::error::{AutomationError, AutomationResult};
use super::{Automation, AutomationLauncher, ElementHandle, WaitCondition, WindowHandle};

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: Arc<ChromiumSection>,
    poll_interval: Duration,
}

impl ChromiumLauncher {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            config: Arc::new(config.chromium.clone()),
            poll_interval: config.timing.poll_interval(),
        }
    }

    pub fn config(&self) -> &ChromiumSection {
        &self.config
    }

    fn build_chromium_config(&self) -> AutomationResult<ChromiumConfig> {
        let mut builder =
            ChromiumConfig::builder().window_size(self.config.window_width, self.config.window_height);

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![format!(
            "--window-size={},{}",
            self.config.window_width, self.config.window_height
        )];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        args.extend(self.config.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(AutomationError::Configuration)
    }
}

#[async_trait]
impl AutomationLauncher for ChromiumLauncher {
    async fn launch(&self) -> AutomationResult<Box<dyn Automation>> {
        let chromium_config = self.build_chromium_config()?;
        info!(
            headless = self.config.headless,
            width = self.config.window_width,
            height = self.config.window_height,
            executable = ?self.config.executable_path,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| AutomationError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        Ok(Box::new(ChromiumAutomation {
            browser: Some(browser),
            handler_task: Some(handler_task),
            current: Some(page),
            poll_interval: self.poll_interval,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ElementState {
    Missing,
    Hidden,
    Disabled,
    Ready,
}

impl ElementState {
    fn satisfies(self, condition: WaitCondition) -> bool {
        match condition {
            WaitCondition::Present => self != ElementState::Missing,
            WaitCondition::Visible => {
                matches!(self, ElementState::Disabled | ElementState::Ready)
            }
            WaitCondition::Clickable => self == ElementState::Ready,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ElementReply {
    found: bool,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug)]
pub struct ChromiumAutomation {
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    current: Option<Page>,
    poll_interval: Duration,
}

impl ChromiumAutomation {
    fn browser(&self) -> AutomationResult<&Browser> {
        self.browser.as_ref().ok_or(AutomationError::SessionClosed)
    }

    fn page(&self) -> AutomationResult<&Page> {
        if self.browser.is_none() {
            return Err(AutomationError::SessionClosed);
        }
        self.current.as_ref().ok_or(AutomationError::NoActiveWindow)
    }

    async fn evaluate<T: DeserializeOwned>(&self, script: String) -> AutomationResult<T> {
        self.page()?
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| AutomationError::Script(format!("failed to decode result: {err}")))
    }

    async fn probe(&self, selector: &str) -> AutomationResult<ElementState> {
        let script = format!(
            r#"
(() => {{
    const el = document.evaluate({selector}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    if (!el) {{ return 'missing'; }}
    const style = window.getComputedStyle(el);
    const rendered = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    if (!rendered || style.visibility === 'hidden') {{ return 'hidden'; }}
    if (el.disabled) {{ return 'disabled'; }}
    return 'ready';
}})()
"#,
            selector = js_string(selector)?
        );
        self.evaluate(script).await
    }

    async fn on_element(&self, element: &ElementHandle, body: &str) -> AutomationResult<ElementReply> {
        let script = format!(
            r#"
(() => {{
    const el = document.evaluate({selector}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    if (!el) {{ return {{ found: false, text: null }}; }}
    const text = (() => {{ {body} }})();
    return {{ found: true, text: text === undefined || text === null ? null : String(text) }};
}})()
"#,
            selector = js_string(element.selector())?
        );
        let reply: ElementReply = self.evaluate(script).await?;
        if !reply.found {
            return Err(AutomationError::Script(format!(
                "element no longer attached: {}",
                element.selector()
            )));
        }
        Ok(reply)
    }
}

fn js_string(value: &str) -> AutomationResult<String> {
    serde_json::to_string(value)
        .map_err(|err| AutomationError::Script(format!("failed to quote selector: {err}")))
}

#[async_trait]
impl Automation for ChromiumAutomation {
    async fn navigate(&mut self, url: &str) -> AutomationResult<()> {
        let page = self.page()?;
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    async fn locate(
        &mut self,
        selector: &str,
        condition: WaitCondition,
        timeout: Duration,
    ) -> AutomationResult<ElementHandle> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = match self.probe(selector).await {
                Ok(state) => state,
                Err(err) if err.is_session_lost() => return Err(err),
                Err(err) => {
                    debug!(selector, error = %err, "element probe failed, treating as missing");
                    ElementState::Missing
                }
            };
            if state.satisfies(condition) {
                return Ok(ElementHandle::new(selector));
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout(format!("{condition} of {selector}")));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn click(&mut self, element: &ElementHandle) -> AutomationResult<()> {
        self.on_element(element, "el.click(); return null;").await?;
        Ok(())
    }

    async fn type_text(&mut self, element: &ElementHandle, text: &str) -> AutomationResult<()> {
        self.on_element(
            element,
            "el.focus(); if ('value' in el) { el.value = ''; el.dispatchEvent(new Event('input', { bubbles: true })); } return null;",
        )
        .await?;
        self.page()?.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn select_index(
        &mut self,
        element: &ElementHandle,
        index: usize,
    ) -> AutomationResult<()> {
        let body = format!(
            "if (!el.options || el.options.length <= {index}) {{ throw new Error('option {index} out of range'); }} el.selectedIndex = {index}; el.dispatchEvent(new Event('change', {{ bubbles: true }})); return null;"
        );
        self.on_element(element, &body).await?;
        Ok(())
    }

    async fn read_text(&mut self, element: &ElementHandle) -> AutomationResult<Option<String>> {
        let reply = self
            .on_element(element, "return el.innerText ?? el.textContent;")
            .await?;
        Ok(reply.text)
    }

    async fn current_url(&mut self) -> AutomationResult<String> {
        Ok(self.page()?.url().await?.unwrap_or_default())
    }

    async fn open_window(&mut self) -> AutomationResult<WindowHandle> {
        let page = self.browser()?.new_page("about:blank").await?;
        Ok(WindowHandle::new(page.target_id().inner().clone()))
    }

    async fn list_windows(&mut self) -> AutomationResult<Vec<WindowHandle>> {
        let pages = self.browser()?.pages().await?;
        Ok(pages
            .iter()
            .map(|page| WindowHandle::new(page.target_id().inner().clone()))
            .collect())
    }

    async fn switch_window(&mut self, window: &WindowHandle) -> AutomationResult<()> {
        let pages = self.browser()?.pages().await?;
        let page = pages
            .into_iter()
            .find(|page| page.target_id().inner() == window.id())
            .ok_or_else(|| AutomationError::UnknownWindow(window.to_string()))?;
        page.bring_to_front().await?;
        self.current = Some(page);
        Ok(())
    }

    async fn close_current_window(&mut self) -> AutomationResult<()> {
        self.browser()?;
        let page = self.current.take().ok_or(AutomationError::NoActiveWindow)?;
        page.close().await?;
        Ok(())
    }

    async fn teardown(&mut self) -> AutomationResult<()> {
        self.current = None;
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        info!("Shutting down Chromium instance");
        if let Err(err) = browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("ChromiumAutomation dropped without explicit teardown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_state_matches_wait_conditions() {
        assert!(!ElementState::Missing.satisfies(WaitCondition::Present));
        assert!(ElementState::Hidden.satisfies(WaitCondition::Present));
        assert!(!ElementState::Hidden.satisfies(WaitCondition::Visible));
        assert!(ElementState::Disabled.satisfies(WaitCondition::Visible));
        assert!(!ElementState::Disabled.satisfies(WaitCondition::Clickable));
        assert!(ElementState::Ready.satisfies(WaitCondition::Clickable));
    }

    #[test]
    fn selectors_are_quoted_for_scripts() {
        let quoted = js_string(r#"//*[@id="site"]"#).unwrap();
        assert_eq!(quoted, r#""//*[@id=\"site\"]""#);
    }

    #[test]
    fn launcher_builds_config_from_crawler_settings() {
        let mut config = CrawlerConfig::default();
        config.chromium.executable_path = Some("/usr/bin/chromium".into());
        config.chromium.extra_args = vec!["--mute-audio".into()];
        let launcher = ChromiumLauncher::new(&config);
        assert!(launcher.build_chromium_config().is_ok());
        assert_eq!(launcher.config().window_width, 1920);
    }
}
