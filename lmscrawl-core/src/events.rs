//! Run log and live event fan-out.
//!
//! Every operator-visible line goes through [`RunEmitter`], which appends it to
//! the [`RunLog`], mirrors it to `tracing`, and broadcasts it through the
//! [`EventHub`] to whichever observers are connected.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Number of log entries exposed by default.
pub const RECENT_LOG_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}

/// Append-only log for the current run.
#[derive(Debug, Default)]
pub struct RunLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry::now(message);
        self.lock().push(entry.clone());
        entry
    }

    /// The newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.lock();
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Payloads delivered to observers. Serializes with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Log {
        message: String,
    },
    Progress {
        progress: f64,
        message: String,
    },
    Status {
        message: String,
    },
    Complete {
        message: String,
        collected_count: usize,
        filename: Option<String>,
    },
    Error {
        message: String,
    },
    Stopped {
        message: String,
    },
}

impl RunEvent {
    pub fn message(&self) -> &str {
        match self {
            RunEvent::Log { message }
            | RunEvent::Progress { message, .. }
            | RunEvent::Status { message }
            | RunEvent::Complete { message, .. }
            | RunEvent::Error { message }
            | RunEvent::Stopped { message } => message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverGone;

pub trait EventObserver: Send + Sync {
    /// Delivers one event. An error marks the observer as disconnected.
    fn deliver(&self, event: &RunEvent) -> Result<(), ObserverGone>;
}

impl EventObserver for mpsc::UnboundedSender<RunEvent> {
    fn deliver(&self, event: &RunEvent) -> Result<(), ObserverGone> {
        self.send(event.clone()).map_err(|_| ObserverGone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

/// Registry of connected observers. Observers that fail delivery are dropped.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    observers: Mutex<BTreeMap<ObserverId, Arc<dyn EventObserver>>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, observer);
        debug!(observer = id.0, "observer subscribed");
        id
    }

    /// Subscribes an unbounded channel and hands back its receiving end.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe_observer(Arc::new(tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    /// Delivers `event` to every observer; returns how many received it.
    pub fn broadcast(&self, event: &RunEvent) -> usize {
        let mut observers = self.lock();
        let mut gone = Vec::new();
        for (id, observer) in observers.iter() {
            if observer.deliver(event).is_err() {
                gone.push(*id);
            }
        }
        for id in &gone {
            observers.remove(id);
            debug!(observer = id.0, "observer disconnected, removed");
        }
        observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ObserverId, Arc<dyn EventObserver>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Writes run-log lines and broadcasts the matching events.
#[derive(Debug, Clone)]
pub struct RunEmitter {
    log: Arc<RunLog>,
    hub: Arc<EventHub>,
}

impl RunEmitter {
    pub fn new(log: Arc<RunLog>, hub: Arc<EventHub>) -> Self {
        Self { log, hub }
    }

    /// Appends a line and forwards it as a `log` event.
    pub fn log(&self, message: impl Into<String>) -> LogEntry {
        let entry = self.log.append(message);
        info!(target: "lmscrawl::run", "{}", entry.message);
        self.hub.broadcast(&RunEvent::Log {
            message: entry.to_string(),
        });
        entry
    }

    pub fn progress(&self, fraction: f64, message: impl Into<String>) {
        let message = message.into();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.hub.broadcast(&RunEvent::Progress {
            progress: fraction,
            message: message.clone(),
        });
        self.log(message);
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        self.log(message.clone());
        self.hub.broadcast(&RunEvent::Status { message });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(target: "lmscrawl::run", "{message}");
        self.log.append(message.clone());
        self.hub.broadcast(&RunEvent::Error { message });
    }

    pub fn stopped(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "lmscrawl::run", "{message}");
        self.log.append(message.clone());
        self.hub.broadcast(&RunEvent::Stopped { message });
    }

    pub fn complete(&self, collected_count: usize, filename: Option<String>) {
        let message = format!("Crawl complete! Collected {collected_count} records.");
        self.log.append(message.clone());
        info!(target: "lmscrawl::run", collected_count, filename = ?filename, "{message}");
        self.hub.broadcast(&RunEvent::Complete {
            message,
            collected_count,
            filename,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter() -> (RunEmitter, Arc<RunLog>, Arc<EventHub>) {
        let log = Arc::new(RunLog::new());
        let hub = Arc::new(EventHub::new());
        (RunEmitter::new(Arc::clone(&log), Arc::clone(&hub)), log, hub)
    }

    #[test]
    fn recent_returns_newest_entries_in_order() {
        let log = RunLog::new();
        for n in 0..60 {
            log.append(format!("line {n}"));
        }
        let recent = log.recent(RECENT_LOG_LIMIT);
        assert_eq!(recent.len(), 50);
        assert_eq!(recent[0].message, "line 10");
        assert_eq!(recent[49].message, "line 59");
        assert_eq!(log.len(), 60);
    }

    #[test]
    fn log_entry_display_carries_timestamp() {
        let entry = LogEntry::now("hello");
        let rendered = entry.to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] hello"));
    }

    #[test]
    fn broadcast_prunes_disconnected_observers() {
        let hub = EventHub::new();
        let (_kept, mut kept_rx) = hub.subscribe();
        let (_dropped, dropped_rx) = hub.subscribe();
        drop(dropped_rx);

        let delivered = hub.broadcast(&RunEvent::Status {
            message: "ping".into(),
        });
        assert_eq!(delivered, 1);
        assert_eq!(hub.observer_count(), 1);
        assert_eq!(kept_rx.try_recv().unwrap().message(), "ping");
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = EventHub::new();
        let (id, mut rx) = hub.subscribe();
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.broadcast(&RunEvent::Log {
            message: "ignored".into(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn progress_emits_progress_then_log() {
        let (emitter, log, hub) = emitter();
        let (_id, mut rx) = hub.subscribe();
        emitter.progress(0.5, "halfway");
        emitter.progress(7.0, "overshoot");

        match rx.try_recv().unwrap() {
            RunEvent::Progress { progress, message } => {
                assert_eq!(progress, 0.5);
                assert_eq!(message, "halfway");
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.try_recv().unwrap() {
            RunEvent::Log { message } => assert!(message.ends_with("halfway")),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.try_recv().unwrap() {
            RunEvent::Progress { progress, .. } => assert_eq!(progress, 1.0),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = RunEvent::Progress {
            progress: 0.25,
            message: "1/4".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["progress"], 0.25);

        let complete = RunEvent::Complete {
            message: "done".into(),
            collected_count: 3,
            filename: Some("exam_data_1.csv".into()),
        };
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["collected_count"], 3);
    }
}
