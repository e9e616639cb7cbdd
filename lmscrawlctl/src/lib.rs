use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use lmscrawl_core::{
    load_crawler_config, ChromiumLauncher, ControlError, CrawlerConfig, RunController,
};
use serde::Serialize;
use thiserror::Error;

pub mod commands;

pub use commands::crawl::{CrawlArgs, CrawlSummary};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] lmscrawl_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("run rejected: {0}")]
    Control(#[from] ControlError),
    #[error("credentials missing: set LMSCRAWL_USERNAME and LMSCRAWL_PASSWORD or fill [credentials]")]
    MissingCredentials,
    #[error("crawl failed: {0}")]
    RunFailed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "LMS exam submission crawler", long_about = None)]
pub struct Cli {
    /// Path to lmscrawl.toml
    #[arg(long, default_value = "configs/lmscrawl.toml")]
    pub config: PathBuf,
    /// Output format for events and summaries
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
    /// Enables debug logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Logs in, crawls one exam and exports the collected submissions
    Run(CrawlArgs),
    /// Shows the effective configuration with secrets hidden
    Config,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Run(args) => {
            let summary = context.crawl(args, cli.output)?;
            render(&summary, cli.output)?;
            if let Some(failure) = summary.failure {
                return Err(AppError::RunFailed(failure));
            }
        }
        Commands::Config => {
            render(&context.config_view(), cli.output)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

pub trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: CrawlerConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_crawler_config(&config_path)?.with_env_overrides();
        Ok(Self {
            config,
            config_path,
        })
    }

    fn crawl(&self, args: &CrawlArgs, output: OutputFormat) -> Result<CrawlSummary> {
        let credentials = &self.config.credentials;
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(AppError::MissingCredentials);
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async {
            let launcher = Arc::new(ChromiumLauncher::new(&self.config));
            let controller = RunController::new(self.config.clone(), launcher);
            commands::crawl::execute(&controller, args, output).await
        })
    }

    fn config_view(&self) -> ConfigView {
        let config = &self.config;
        ConfigView {
            config_path: self.config_path.clone(),
            login_url: config.target.login_url(),
            record_set_url: config.target.record_set_url("{id}"),
            username: config.credentials.username.clone(),
            password_set: !config.credentials.password.is_empty(),
            headless: config.chromium.headless,
            executable_path: config.chromium.executable_path.clone(),
            default_wait_ms: config.timing.default_wait_ms,
            short_wait_ms: config.timing.short_wait_ms,
            name_column: config.export.name_column.clone(),
            detail_column: config.export.detail_column.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfigView {
    config_path: PathBuf,
    login_url: String,
    record_set_url: String,
    username: String,
    password_set: bool,
    headless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    executable_path: Option<String>,
    default_wait_ms: u64,
    short_wait_ms: u64,
    name_column: String,
    detail_column: String,
}

impl DisplayFallback for ConfigView {
    fn display(&self) -> String {
        let username = if self.username.is_empty() {
            "(unset)"
        } else {
            self.username.as_str()
        };
        let mut lines = vec![
            format!("Config: {}", self.config_path.display()),
            format!("Login page: {}", self.login_url),
            format!("Exam page: {}", self.record_set_url),
            format!(
                "User: {username} (password {})",
                if self.password_set { "set" } else { "unset" }
            ),
            format!("Headless: {}", self.headless),
        ];
        if let Some(path) = &self.executable_path {
            lines.push(format!("Browser: {path}"));
        }
        lines.push(format!(
            "Waits: {} ms default, {} ms short",
            self.default_wait_ms, self.short_wait_ms
        ));
        lines.push(format!(
            "Columns: {} / {}",
            self.name_column, self.detail_column
        ));
        lines.join("\n")
    }
}
