//! Browser-driven crawler for LMS exam submissions.
//!
//! The [`RunController`] owns the run lifecycle and threads a [`RunEmitter`]
//! through login ([`LoginWorkflow`]), extraction ([`Extractor`]) and export
//! ([`Exporter`]). The browser sits behind the [`Automation`] trait.

pub mod auth;
pub mod automation;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod export;
pub mod extract;
pub mod record;

pub use auth::{AuthError, AuthResult, AuthenticatedContext, LoginWorkflow};
pub use automation::{
    Automation, AutomationError, AutomationLauncher, AutomationResult, ChromiumAutomation,
    ChromiumLauncher, ElementHandle, WaitCondition, WindowHandle,
};
pub use config::{
    load_crawler_config, ChromiumSection, CrawlerConfig, CredentialsSection, ExportSection,
    SelectorSection, TargetSection, TimingSection,
};
pub use controller::{ControlError, ControlResult, CrawlError, RunController, RunState, RunTicket};
pub use error::{ConfigError, Result};
pub use events::{
    EventHub, EventObserver, LogEntry, ObserverGone, ObserverId, RunEmitter, RunEvent, RunLog,
    RECENT_LOG_LIMIT,
};
pub use export::{
    artifact_filename, ExportArtifact, ExportError, ExportFormat, ExportResult, Exporter,
};
pub use extract::{
    parse_pagination_total, ExtractionError, ExtractionOutcome, ExtractionResult, Extractor,
    Termination,
};
pub use record::{CollectedSet, Record};
