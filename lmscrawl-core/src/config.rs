use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const USERNAME_ENV: &str = "LMSCRAWL_USERNAME";
pub const PASSWORD_ENV: &str = "LMSCRAWL_PASSWORD";
pub const CHROME_BIN_ENV: &str = "CHROME_BIN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub target: TargetSection,
    pub credentials: CredentialsSection,
    pub chromium: ChromiumSection,
    pub timing: TimingSection,
    pub selectors: SelectorSection,
    pub export: ExportSection,
}

impl CrawlerConfig {
    /// Applies `LMSCRAWL_USERNAME`, `LMSCRAWL_PASSWORD` and `CHROME_BIN` on top of
    /// whatever the file provided.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(username) = non_empty_env(USERNAME_ENV) {
            self.credentials.username = username;
        }
        if let Some(password) = non_empty_env(PASSWORD_ENV) {
            self.credentials.password = password;
        }
        if let Some(executable) = non_empty_env(CHROME_BIN_ENV) {
            self.chromium.executable_path = Some(executable);
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSection {
    pub base_url: String,
    pub login_path: String,
    /// Path of the exam detail page; `{id}` is replaced by the record-set id.
    pub record_set_path: String,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            base_url: "https://lmsadmin-kdt.fastcampus.co.kr".to_string(),
            login_path: "/sign-in".to_string(),
            record_set_path: "/exams/{id}/detail".to_string(),
        }
    }
}

impl TargetSection {
    pub fn login_url(&self) -> String {
        join_url(&self.base_url, &self.login_path)
    }

    pub fn record_set_url(&self, record_set_id: &str) -> String {
        let path = self.record_set_path.replace("{id}", record_set_id);
        join_url(&self.base_url, &path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl fmt::Debug for CredentialsSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsSection")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout_seconds: Option<u64>,
    pub extra_args: Vec<String>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            window_width: 1920,
            window_height: 1080,
            request_timeout_seconds: Some(30),
            extra_args: vec![
                "--disable-dev-shm-usage".to_string(),
                "--disable-popup-blocking".to_string(),
                "--disable-notifications".to_string(),
                "--disable-extensions".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
                "--disable-background-timer-throttling".to_string(),
                "--disable-backgrounding-occluded-windows".to_string(),
                "--disable-renderer-backgrounding".to_string(),
                "--disable-features=TranslateUI".to_string(),
                "--disable-ipc-flooding-protection".to_string(),
                "--password-store=basic".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub default_wait_ms: u64,
    pub short_wait_ms: u64,
    pub poll_interval_ms: u64,
    pub page_settle_ms: u64,
    pub action_settle_ms: u64,
    pub advance_settle_ms: u64,
    pub login_step_settle_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            default_wait_ms: 20_000,
            short_wait_ms: 2_000,
            poll_interval_ms: 100,
            page_settle_ms: 1_000,
            action_settle_ms: 500,
            advance_settle_ms: 1_000,
            login_step_settle_ms: 200,
        }
    }
}

impl TimingSection {
    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.default_wait_ms)
    }

    pub fn short_wait(&self) -> Duration {
        Duration::from_millis(self.short_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }

    pub fn action_settle(&self) -> Duration {
        Duration::from_millis(self.action_settle_ms)
    }

    pub fn advance_settle(&self) -> Duration {
        Duration::from_millis(self.advance_settle_ms)
    }

    pub fn login_step_settle(&self) -> Duration {
        Duration::from_millis(self.login_step_settle_ms)
    }

    /// All waits and settle delays set to zero, keeping a minimal poll interval.
    pub fn immediate() -> Self {
        Self {
            default_wait_ms: 0,
            short_wait_ms: 0,
            poll_interval_ms: 1,
            page_settle_ms: 0,
            action_settle_ms: 0,
            advance_settle_ms: 0,
            login_step_settle_ms: 0,
        }
    }
}

/// XPath expressions for every element the crawler touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub site_select: String,
    pub username_input: String,
    pub password_input: String,
    pub login_button: String,
    pub pagination: String,
    pub record_name: String,
    pub detail_button: String,
    pub detail_text: String,
    pub detail_close: String,
    pub secondary_modal_close: String,
    pub next_button: String,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            site_select: r#"//*[@id="site"]"#.to_string(),
            username_input: r#"//*[@id="userName"]"#.to_string(),
            password_input: r#"//*[@id="password"]"#.to_string(),
            login_button: r#"//*[@id="app"]/main/section/div/form/button"#.to_string(),
            pagination: r#"//*[@id="app"]/main/section/div/div[2]/div/div[2]/div[2]/span[2]"#
                .to_string(),
            record_name: r#"//*[@id="app"]/main/section/div/div[2]/div/div[2]/div[1]/strong"#
                .to_string(),
            detail_button:
                r#"//*[@id="app"]/main/section/div/div[2]/div/div[4]/div/div/table/tbody/tr/td[6]/button"#
                    .to_string(),
            detail_text: r#"//*[@id="modals"]/section/div/div/div/div[2]/ul/li[2]/div/p"#
                .to_string(),
            detail_close: r#"//*[@id="modals"]/section/div/div/div/div[1]/button"#.to_string(),
            secondary_modal_close: r#"//*[@id="modals"]/section[2]/div/div/section/div/button[2]"#
                .to_string(),
            next_button: r#"//*[@id="app"]/main/section/div/div[2]/div/div[2]/div[2]/button[2]"#
                .to_string(),
        }
    }
}

impl SelectorSection {
    /// The next-record control restricted to its enabled state.
    pub fn enabled_next_button(&self) -> String {
        format!("{}[not(@disabled)]", self.next_button)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub name_column: String,
    pub detail_column: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            name_column: "수강자 이름".to_string(),
            detail_column: "블로그 링크".to_string(),
        }
    }
}

pub fn load_crawler_config<P: AsRef<Path>>(path: P) -> Result<CrawlerConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
