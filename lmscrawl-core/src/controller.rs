//! Run lifecycle: the single owner of run state.
//!
//! A [`RunController`] accepts at most one run at a time. `start` validates the
//! request and spawns the login, extraction and export pipeline on the Tokio
//! runtime; `stop` cancels it cooperatively and waits for the task; `cleanup`
//! releases the browser and returns the controller to idle on every exit path.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthError, AuthenticatedContext, LoginWorkflow};
use crate::automation::AutomationLauncher;
use crate::config::CrawlerConfig;
use crate::events::{
    EventHub, EventObserver, LogEntry, ObserverId, RunEmitter, RunEvent, RunLog,
};
use crate::export::{ExportArtifact, Exporter};
use crate::extract::{ExtractionError, ExtractionOutcome, Extractor, Termination};
use crate::record::CollectedSet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("a crawl is already running")]
    AlreadyRunning,
    #[error("no crawl is running")]
    NotRunning,
    #[error("invalid exam id {0:?}: expected digits only")]
    InvalidIdentifier(String),
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Failure of a started run. Reported through events, never returned to callers
/// of [`RunController::start`].
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub running: bool,
    pub record_set_id: Option<String>,
    pub collected_count: usize,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTicket {
    pub session_id: String,
    pub record_set_id: String,
}

#[derive(Debug, Default)]
struct Control {
    running: bool,
    record_set_id: Option<String>,
    session_id: Option<String>,
    cancel: CancellationToken,
}

/// Spawned pipeline. `done` can be awaited by any number of callers.
struct RunTask {
    abort: AbortHandle,
    done: Shared<BoxFuture<'static, ()>>,
}

struct ControllerInner {
    config: Arc<CrawlerConfig>,
    launcher: Arc<dyn AutomationLauncher>,
    control: Mutex<Control>,
    collected: CollectedSet,
    log: Arc<RunLog>,
    hub: Arc<EventHub>,
    emitter: RunEmitter,
    artifact: Mutex<Option<ExportArtifact>>,
    context: tokio::sync::Mutex<Option<AuthenticatedContext>>,
    task: Mutex<Option<RunTask>>,
}

#[derive(Clone)]
pub struct RunController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("state", &self.status())
            .finish()
    }
}

impl RunController {
    pub fn new(config: CrawlerConfig, launcher: Arc<dyn AutomationLauncher>) -> Self {
        let log = Arc::new(RunLog::new());
        let hub = Arc::new(EventHub::new());
        let emitter = RunEmitter::new(Arc::clone(&log), Arc::clone(&hub));
        Self {
            inner: Arc::new(ControllerInner {
                config: Arc::new(config),
                launcher,
                control: Mutex::new(Control::default()),
                collected: CollectedSet::new(),
                log,
                hub,
                emitter,
                artifact: Mutex::new(None),
                context: tokio::sync::Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Starts a run in the background. Must be called from within a Tokio
    /// runtime.
    pub fn start(&self, record_set_id: &str, format: &str) -> ControlResult<RunTicket> {
        let mut control = self.inner.lock_control();
        if control.running || self.inner.task_in_flight() {
            return Err(ControlError::AlreadyRunning);
        }
        if !is_plain_integer(record_set_id) {
            return Err(ControlError::InvalidIdentifier(record_set_id.to_string()));
        }

        self.inner.collected.clear();
        self.inner.log.clear();

        let ticket = RunTicket {
            session_id: Uuid::new_v4().to_string(),
            record_set_id: record_set_id.to_string(),
        };
        let cancel = CancellationToken::new();
        *control = Control {
            running: true,
            record_set_id: Some(ticket.record_set_id.clone()),
            session_id: Some(ticket.session_id.clone()),
            cancel: cancel.clone(),
        };
        drop(control);

        info!(
            session_id = %ticket.session_id,
            record_set_id = %ticket.record_set_id,
            format,
            "crawl started"
        );
        let handle = tokio::spawn(run_pipeline(
            Arc::clone(&self.inner),
            ticket.clone(),
            format.to_string(),
            cancel,
        ));
        let abort = handle.abort_handle();
        let done = async move {
            if let Err(err) = handle.await {
                warn!(error = %err, "crawl task ended abnormally");
            }
        }
        .boxed()
        .shared();
        *lock(&self.inner.task) = Some(RunTask { abort, done });
        Ok(ticket)
    }

    /// Requests a cooperative stop, waits for the run task to wind down and
    /// cleans up.
    pub async fn stop(&self) -> ControlResult<()> {
        let session_id = {
            let control = self.inner.lock_control();
            if !control.running {
                return Err(ControlError::NotRunning);
            }
            control.cancel.cancel();
            control.session_id.clone()
        };
        self.inner.emitter.stopped("Crawl stopped.");

        self.join().await;
        // The pipeline cleans up after itself; only a task that never got
        // that far leaves the run marked as running.
        let still_running = self.inner.lock_control().running;
        if let (true, Some(session_id)) = (still_running, session_id) {
            self.inner.cleanup_session(&session_id).await;
        }
        Ok(())
    }

    /// Releases the browser and resets the run state to idle. Never fails.
    pub async fn cleanup(&self) {
        self.inner.cleanup().await;
    }

    pub fn status(&self) -> RunState {
        let control = self.inner.lock_control();
        RunState {
            running: control.running,
            record_set_id: control.record_set_id.clone(),
            collected_count: self.inner.collected.len(),
            session_id: control.session_id.clone(),
        }
    }

    /// Waits for the current run task, if any, to finish. Safe to call from
    /// several places at once.
    pub async fn join(&self) {
        let done = lock(&self.inner.task)
            .as_ref()
            .map(|task| task.done.clone());
        if let Some(done) = done {
            done.await;
        }
    }

    /// The artifact produced by the most recent successful export.
    pub fn export_last(&self) -> Option<ExportArtifact> {
        lock(&self.inner.artifact).clone()
    }

    pub fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.inner.log.recent(limit)
    }

    pub fn log_count(&self) -> usize {
        self.inner.log.len()
    }

    pub fn subscribe(&self) -> (ObserverId, tokio::sync::mpsc::UnboundedReceiver<RunEvent>) {
        self.inner.hub.subscribe()
    }

    pub fn subscribe_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        self.inner.hub.subscribe_observer(observer)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.hub.unsubscribe(id)
    }

    pub fn broadcast(&self, event: &RunEvent) -> usize {
        self.inner.hub.broadcast(event)
    }
}

impl ControllerInner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        lock(&self.control)
    }

    fn task_in_flight(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.abort.is_finished())
    }

    async fn crawl(
        &self,
        record_set_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionOutcome, CrawlError> {
        let previous = self.context.lock().await.take();
        let context = LoginWorkflow::new(Arc::clone(&self.config), Arc::clone(&self.launcher))
            .authenticate(previous, &self.emitter)
            .await?;
        self.emitter.status("Login succeeded. Starting crawl...");

        let mut slot = self.context.lock().await;
        let context = slot.insert(context);
        let outcome = Extractor::new(Arc::clone(&self.config))
            .extract(context, record_set_id, &self.collected, cancel, &self.emitter)
            .await?;
        Ok(outcome)
    }

    /// Exports whatever was collected, partial runs included. The retained
    /// artifact is only replaced by a successful export.
    fn publish(&self, record_set_id: &str, format: &str, outcome: &ExtractionOutcome) {
        let records = self.collected.snapshot();
        if records.is_empty() {
            if outcome.termination == Termination::Stopped {
                self.emitter.log("Stopped before any record was collected.");
            } else {
                self.emitter.error("No data collected.");
            }
            return;
        }
        let artifact = Exporter::new(self.config.export.clone()).export(
            &records,
            record_set_id,
            format,
            &self.emitter,
        );
        let filename = artifact.as_ref().map(|artifact| artifact.filename.clone());
        if let Some(artifact) = artifact {
            *lock(&self.artifact) = Some(artifact);
        }
        self.emitter.complete(records.len(), filename);
    }

    /// Cleans up only while `session_id` is still the controller's session, so
    /// a late finisher never tears down a newer run.
    async fn cleanup_session(&self, session_id: &str) {
        let current = self.lock_control().session_id.as_deref() == Some(session_id);
        if current {
            self.cleanup().await;
        }
    }

    async fn cleanup(&self) {
        self.emitter.log("Starting cleanup...");
        self.lock_control().cancel.cancel();

        let context = self.context.lock().await.take();
        if let Some(context) = context {
            context.release(&self.emitter).await;
        }

        let mut control = self.lock_control();
        control.running = false;
        control.record_set_id = None;
    }
}

async fn run_pipeline(
    inner: Arc<ControllerInner>,
    ticket: RunTicket,
    format: String,
    cancel: CancellationToken,
) {
    inner.emitter.status("Starting login process...");
    match inner.crawl(&ticket.record_set_id, &cancel).await {
        Ok(outcome) => {
            info!(
                session_id = %ticket.session_id,
                total = outcome.total,
                collected = outcome.collected_count,
                termination = ?outcome.termination,
                "crawl finished"
            );
            inner.publish(&ticket.record_set_id, &format, &outcome);
        }
        Err(err) => {
            inner.emitter.error(format!("Crawl failed: {err}"));
        }
    }
    inner.cleanup_session(&ticket.session_id).await;
}

fn is_plain_integer(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_must_be_ascii_digits() {
        assert!(is_plain_integer("12345"));
        assert!(is_plain_integer("0"));
        assert!(!is_plain_integer(""));
        assert!(!is_plain_integer("-1"));
        assert!(!is_plain_integer("12a"));
        assert!(!is_plain_integer(" 12"));
        assert!(!is_plain_integer("١٢"));
    }
}
