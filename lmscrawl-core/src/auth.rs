//! Login handshake against the LMS admin console.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::automation::{Automation, AutomationError, AutomationLauncher, WaitCondition};
use crate::config::CrawlerConfig;
use crate::events::RunEmitter;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to acquire browser: {0}")]
    Launch(#[source] AutomationError),
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: AutomationError,
    },
    #[error("still on the login page after {waited:?}")]
    LoginNotConfirmed { waited: Duration },
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// A logged-in browser, ready for extraction.
pub struct AuthenticatedContext {
    automation: Box<dyn Automation>,
}

impl std::fmt::Debug for AuthenticatedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedContext").finish_non_exhaustive()
    }
}

impl AuthenticatedContext {
    pub fn new(automation: Box<dyn Automation>) -> Self {
        Self { automation }
    }

    pub fn automation(&mut self) -> &mut dyn Automation {
        self.automation.as_mut()
    }

    /// Releases the browser. Failures are logged, never returned.
    pub async fn release(mut self, emitter: &RunEmitter) {
        match self.automation.teardown().await {
            Ok(()) => {
                emitter.log("Browser closed.");
            }
            Err(err) => {
                emitter.log(format!("Error while closing browser: {err}"));
            }
        }
    }
}

pub struct LoginWorkflow {
    config: Arc<CrawlerConfig>,
    launcher: Arc<dyn AutomationLauncher>,
}

impl LoginWorkflow {
    pub fn new(config: Arc<CrawlerConfig>, launcher: Arc<dyn AutomationLauncher>) -> Self {
        Self { config, launcher }
    }

    /// Launches a fresh browser and signs in. `previous`, when given, is torn
    /// down first. On failure the new browser is torn down before returning.
    pub async fn authenticate(
        &self,
        previous: Option<AuthenticatedContext>,
        emitter: &RunEmitter,
    ) -> AuthResult<AuthenticatedContext> {
        debug!(login_url = %self.config.target.login_url(), "authenticating");
        if let Some(previous) = previous {
            previous.release(emitter).await;
        }

        let mut automation = match self.launcher.launch().await {
            Ok(automation) => automation,
            Err(err) => {
                emitter.log(format!("Browser setup failed: {err}"));
                return Err(AuthError::Launch(err));
            }
        };

        match self.sign_in(automation.as_mut(), emitter).await {
            Ok(landing_url) => {
                debug!(%landing_url, "browser authenticated");
                Ok(AuthenticatedContext::new(automation))
            }
            Err(err) => {
                emitter.log(format!("Login failed: {err}"));
                if let Err(teardown_err) = automation.teardown().await {
                    warn!(error = %teardown_err, "teardown after failed login");
                }
                Err(err)
            }
        }
    }

    async fn sign_in(
        &self,
        automation: &mut dyn Automation,
        emitter: &RunEmitter,
    ) -> AuthResult<String> {
        let selectors = &self.config.selectors;
        let timing = &self.config.timing;
        let wait = timing.default_wait();
        let login_url = self.config.target.login_url();

        emitter.log("Navigating to login page...");
        automation
            .navigate(&login_url)
            .await
            .map_err(step("open login page"))?;

        let site = automation
            .locate(&selectors.site_select, WaitCondition::Present, wait)
            .await
            .map_err(step("locate site selector"))?;
        automation
            .select_index(&site, 0)
            .await
            .map_err(step("select site"))?;
        emitter.log("Site selected.");
        pause(timing.login_step_settle()).await;

        let username = automation
            .locate(&selectors.username_input, WaitCondition::Present, wait)
            .await
            .map_err(step("locate username field"))?;
        automation
            .type_text(&username, &self.config.credentials.username)
            .await
            .map_err(step("enter username"))?;
        emitter.log("Username entered.");

        let password = automation
            .locate(&selectors.password_input, WaitCondition::Present, wait)
            .await
            .map_err(step("locate password field"))?;
        automation
            .type_text(&password, &self.config.credentials.password)
            .await
            .map_err(step("enter password"))?;
        emitter.log("Password entered.");

        let submit = automation
            .locate(&selectors.login_button, WaitCondition::Clickable, wait)
            .await
            .map_err(step("locate login button"))?;
        automation
            .click(&submit)
            .await
            .map_err(step("click login button"))?;
        emitter.log("Login button clicked.");

        let landing_url = self.await_redirect(automation, &login_url, wait).await?;
        emitter.log("Login succeeded!");

        self.reopen_in_new_tab(automation, &landing_url).await?;
        emitter.log(format!("Reopened {landing_url} in a new tab."));
        pause(timing.page_settle()).await;

        Ok(landing_url)
    }

    async fn await_redirect(
        &self,
        automation: &mut dyn Automation,
        login_url: &str,
        wait: Duration,
    ) -> AuthResult<String> {
        let deadline = Instant::now() + wait;
        loop {
            let url = automation
                .current_url()
                .await
                .map_err(step("read current url"))?;
            if url != login_url {
                return Ok(url);
            }
            if Instant::now() >= deadline {
                return Err(AuthError::LoginNotConfirmed { waited: wait });
            }
            sleep(self.config.timing.poll_interval()).await;
        }
    }

    async fn reopen_in_new_tab(
        &self,
        automation: &mut dyn Automation,
        landing_url: &str,
    ) -> AuthResult<()> {
        let fresh = automation
            .open_window()
            .await
            .map_err(step("open new tab"))?;
        pause(self.config.timing.login_step_settle()).await;

        let windows = automation
            .list_windows()
            .await
            .map_err(step("list tabs"))?;
        if windows.len() > 1 {
            automation
                .close_current_window()
                .await
                .map_err(step("close original tab"))?;
            automation
                .switch_window(&fresh)
                .await
                .map_err(step("switch to new tab"))?;
        }

        automation
            .navigate(landing_url)
            .await
            .map_err(step("reopen landing page"))
    }
}

fn step(step: &'static str) -> impl FnOnce(AutomationError) -> AuthError {
    move |source| AuthError::Step { step, source }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}
