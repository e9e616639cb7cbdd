#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use lmscrawl_core::{
    Automation, AutomationError, AutomationLauncher, AutomationResult, CrawlerConfig,
    ElementHandle, EventHub, RunEmitter, RunLog, SelectorSection, TargetSection, TimingSection,
    WaitCondition, WindowHandle,
};

pub const BASE_URL: &str = "https://lms.test";
pub const LANDING_URL: &str = "https://lms.test/dashboard";

pub fn test_config() -> CrawlerConfig {
    let mut config = CrawlerConfig::default();
    config.target = TargetSection {
        base_url: BASE_URL.to_string(),
        login_path: "/sign-in".to_string(),
        record_set_path: "/exams/{id}/detail".to_string(),
    };
    config.credentials.username = "admin@lms.test".to_string();
    config.credentials.password = "secret".to_string();
    config.timing = TimingSection::immediate();
    config
}

pub fn emitter() -> (RunEmitter, Arc<RunLog>, Arc<EventHub>) {
    let log = Arc::new(RunLog::new());
    let hub = Arc::new(EventHub::new());
    (RunEmitter::new(Arc::clone(&log), Arc::clone(&hub)), log, hub)
}

#[derive(Debug, Clone)]
pub struct FakeRecord {
    /// `None` keeps the name element hidden.
    pub name: Option<String>,
    /// `None` keeps the detail text from ever appearing.
    pub detail: Option<String>,
}

impl FakeRecord {
    pub fn new(name: &str, detail: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            detail: Some(detail.to_string()),
        }
    }

    pub fn nameless() -> Self {
        Self {
            name: None,
            detail: None,
        }
    }
}

/// Scripted state of the simulated admin console, shared by every browser
/// the launcher hands out.
#[derive(Debug, Default)]
pub struct PortalState {
    pub pagination: Option<String>,
    pub records: Vec<FakeRecord>,
    pub position: usize,
    pub modal_open: bool,
    pub url: String,
    pub closed: bool,

    pub redirect_after_login: bool,
    pub missing: HashSet<String>,
    pub fail_launch: bool,
    /// Positions where the "next" control never becomes clickable but is enabled.
    pub stuck_next_at: HashSet<usize>,
    /// Positions where the "next" control is disabled.
    pub disabled_next_at: HashSet<usize>,
    /// Positions where clicking the detail button loses the session once.
    pub session_fault_at: HashSet<usize>,
    /// Positions that show a second modal after the detail modal closes.
    pub secondary_modal_at: HashSet<usize>,
    /// Cancels `cancel` once the portal advances to `stop_before`.
    pub stop_before: Option<usize>,
    pub cancel: Option<CancellationToken>,

    pub windows: Vec<String>,
    pub current_window: Option<String>,
    pub window_seq: usize,

    pub launches: usize,
    pub teardowns: usize,
    pub selected: Vec<usize>,
    pub typed: Vec<(String, String)>,
    pub navigations: Vec<String>,
    pub secondary_closed: usize,
}

#[derive(Clone)]
pub struct FakePortal {
    state: Arc<Mutex<PortalState>>,
    selectors: Arc<SelectorSection>,
    login_url: String,
    launch_gate: Option<Arc<Notify>>,
}

impl FakePortal {
    pub fn new(config: &CrawlerConfig, records: Vec<FakeRecord>) -> Self {
        let pagination = Some(format!("1/{}", records.len()));
        let state = PortalState {
            pagination,
            records,
            redirect_after_login: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            selectors: Arc::new(config.selectors.clone()),
            login_url: config.target.login_url(),
            launch_gate: None,
        }
    }

    /// Makes every launch wait until the returned gate is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.launch_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn state(&self) -> MutexGuard<'_, PortalState> {
        self.state.lock().unwrap()
    }

    /// A browser already sitting on the landing page, as after login.
    pub fn automation(&self) -> FakeAutomation {
        let mut state = self.state();
        state.closed = false;
        state.url = LANDING_URL.to_string();
        state.windows = vec!["tab-0".to_string()];
        state.current_window = Some("tab-0".to_string());
        state.window_seq = 1;
        drop(state);
        FakeAutomation {
            portal: self.clone(),
        }
    }

    pub fn launcher(&self) -> Arc<dyn AutomationLauncher> {
        Arc::new(FakeLauncher {
            portal: self.clone(),
        })
    }
}

pub struct FakeLauncher {
    portal: FakePortal,
}

#[async_trait]
impl AutomationLauncher for FakeLauncher {
    async fn launch(&self) -> AutomationResult<Box<dyn Automation>> {
        if let Some(gate) = &self.portal.launch_gate {
            gate.notified().await;
        }
        {
            let mut state = self.portal.state();
            state.launches += 1;
            if state.fail_launch {
                return Err(AutomationError::Launch("chromium not installed".into()));
            }
        }
        let automation = self.portal.automation();
        self.portal.state().url = "about:blank".to_string();
        Ok(Box::new(automation))
    }
}

pub struct FakeAutomation {
    portal: FakePortal,
}

enum Element {
    Present,
    Clickable,
    Missing,
}

impl FakeAutomation {
    fn live(&self) -> AutomationResult<MutexGuard<'_, PortalState>> {
        let state = self.portal.state();
        if state.closed {
            return Err(AutomationError::SessionClosed);
        }
        Ok(state)
    }

    fn resolve(&self, state: &PortalState, selector: &str) -> Element {
        let s = &self.portal.selectors;
        if state.missing.contains(selector) {
            return Element::Missing;
        }
        let on_login = state.url == self.portal.login_url;
        let record = state.records.get(state.position);
        let has_next = state.position + 1 < state.records.len();

        let available = if selector == s.site_select
            || selector == s.username_input
            || selector == s.password_input
            || selector == s.login_button
        {
            on_login
        } else if selector == s.pagination {
            state.pagination.is_some()
        } else if selector == s.record_name {
            record.is_some_and(|record| record.name.is_some())
        } else if selector == s.detail_button {
            record.is_some()
        } else if selector == s.detail_text {
            state.modal_open && record.is_some_and(|record| record.detail.is_some())
        } else if selector == s.detail_close {
            state.modal_open
        } else if selector == s.secondary_modal_close {
            !state.modal_open && state.secondary_modal_at.contains(&state.position)
        } else if selector == s.enabled_next_button() {
            has_next && !state.disabled_next_at.contains(&state.position)
        } else if selector == s.next_button {
            if state.stuck_next_at.contains(&state.position) {
                return Element::Present;
            }
            has_next && !state.disabled_next_at.contains(&state.position)
        } else {
            false
        };

        if available {
            Element::Clickable
        } else {
            Element::Missing
        }
    }

    fn advance(state: &mut PortalState) {
        state.position += 1;
        state.modal_open = false;
        if state.stop_before == Some(state.position) {
            if let Some(cancel) = &state.cancel {
                cancel.cancel();
            }
        }
    }
}

#[async_trait]
impl Automation for FakeAutomation {
    async fn navigate(&mut self, url: &str) -> AutomationResult<()> {
        let mut state = self.live()?;
        // Opening an exam page always starts on its first submission.
        if url.ends_with("/detail") {
            state.position = 0;
            state.modal_open = false;
        }
        state.url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn locate(
        &mut self,
        selector: &str,
        condition: WaitCondition,
        _timeout: Duration,
    ) -> AutomationResult<ElementHandle> {
        let state = self.live()?;
        let found = match (self.resolve(&state, selector), condition) {
            (Element::Missing, _) => false,
            (Element::Present, WaitCondition::Clickable) => false,
            _ => true,
        };
        if found {
            Ok(ElementHandle::new(selector))
        } else {
            Err(AutomationError::Timeout(format!("{condition} of {selector}")))
        }
    }

    async fn click(&mut self, element: &ElementHandle) -> AutomationResult<()> {
        let mut state = self.live()?;
        let s = Arc::clone(&self.portal.selectors);
        let selector = element.selector();
        if selector == s.login_button {
            if state.redirect_after_login {
                state.url = LANDING_URL.to_string();
            }
        } else if selector == s.detail_button {
            let position = state.position;
            if state.session_fault_at.remove(&position) {
                return Err(AutomationError::SessionClosed);
            }
            state.modal_open = true;
        } else if selector == s.detail_close {
            state.modal_open = false;
        } else if selector == s.secondary_modal_close {
            let position = state.position;
            state.secondary_modal_at.remove(&position);
            state.secondary_closed += 1;
        } else if selector == s.next_button || selector == s.enabled_next_button() {
            Self::advance(&mut state);
        }
        Ok(())
    }

    async fn type_text(&mut self, element: &ElementHandle, text: &str) -> AutomationResult<()> {
        let mut state = self.live()?;
        state
            .typed
            .push((element.selector().to_string(), text.to_string()));
        Ok(())
    }

    async fn select_index(
        &mut self,
        _element: &ElementHandle,
        index: usize,
    ) -> AutomationResult<()> {
        self.live()?.selected.push(index);
        Ok(())
    }

    async fn read_text(&mut self, element: &ElementHandle) -> AutomationResult<Option<String>> {
        let state = self.live()?;
        let s = &self.portal.selectors;
        let record = state.records.get(state.position);
        let text = if element.selector() == s.pagination {
            state.pagination.clone()
        } else if element.selector() == s.record_name {
            record.and_then(|record| record.name.clone())
        } else if element.selector() == s.detail_text {
            record.and_then(|record| record.detail.clone())
        } else {
            None
        };
        Ok(text)
    }

    async fn current_url(&mut self) -> AutomationResult<String> {
        Ok(self.live()?.url.clone())
    }

    async fn open_window(&mut self) -> AutomationResult<WindowHandle> {
        let mut state = self.live()?;
        let id = format!("tab-{}", state.window_seq);
        state.window_seq += 1;
        state.windows.push(id.clone());
        Ok(WindowHandle::new(id))
    }

    async fn list_windows(&mut self) -> AutomationResult<Vec<WindowHandle>> {
        let state = self.live()?;
        Ok(state.windows.iter().map(WindowHandle::new).collect())
    }

    async fn switch_window(&mut self, window: &WindowHandle) -> AutomationResult<()> {
        let mut state = self.live()?;
        if !state.windows.iter().any(|id| id == window.id()) {
            return Err(AutomationError::UnknownWindow(window.to_string()));
        }
        state.current_window = Some(window.id().to_string());
        Ok(())
    }

    async fn close_current_window(&mut self) -> AutomationResult<()> {
        let mut state = self.live()?;
        let current = state
            .current_window
            .take()
            .ok_or(AutomationError::NoActiveWindow)?;
        state.windows.retain(|id| *id != current);
        Ok(())
    }

    async fn teardown(&mut self) -> AutomationResult<()> {
        let mut state = self.portal.state();
        if !state.closed {
            state.closed = true;
            state.teardowns += 1;
        }
        Ok(())
    }
}
