use std::path::PathBuf;

use clap::Args;
use lmscrawl_core::{RunController, RunEvent};
use serde::Serialize;
use tracing::warn;

use crate::{AppError, DisplayFallback, OutputFormat, Result};

/// Crawls one exam and writes the export file.
#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    /// Exam identifier (digits only)
    #[arg(long, value_name = "ID")]
    pub exam_id: String,

    /// Export format
    #[arg(long, value_parser = ["csv", "xlsx", "json", "xml"], default_value = "csv")]
    pub format: String,

    /// Directory that receives the exported file
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub session_id: String,
    pub exam_id: String,
    pub collected_count: usize,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl DisplayFallback for CrawlSummary {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Exam {} (session {})", self.exam_id, self.session_id),
            format!("Collected: {} records", self.collected_count),
        ];
        if self.stopped {
            lines.push("Stopped before the last record.".to_string());
        }
        match (&self.artifact, self.artifact_bytes) {
            (Some(path), Some(bytes)) => {
                lines.push(format!("Artifact: {} ({bytes} bytes)", path.display()))
            }
            _ => lines.push("Artifact: not produced".to_string()),
        }
        if let Some(failure) = &self.failure {
            lines.push(format!("Failure: {failure}"));
        }
        lines.join("\n")
    }
}

/// Tracks the events that shape the final summary while echoing the stream.
#[derive(Debug, Default)]
struct EventTracker {
    stopped: bool,
    filename: Option<String>,
    failure: Option<String>,
}

impl EventTracker {
    fn observe(&mut self, event: &RunEvent, output: OutputFormat) -> Result<()> {
        match event {
            RunEvent::Complete { filename, .. } => self.filename = filename.clone(),
            RunEvent::Error { message } => self.failure = Some(message.clone()),
            RunEvent::Stopped { .. } => self.stopped = true,
            _ => {}
        }
        print_event(event, output)
    }
}

fn print_event(event: &RunEvent, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        // Progress and status messages are mirrored into the log stream.
        OutputFormat::Text => match event {
            RunEvent::Log { message } => println!("{message}"),
            RunEvent::Complete { message, .. } => println!("{message}"),
            RunEvent::Error { message } => eprintln!("error: {message}"),
            RunEvent::Stopped { message } => eprintln!("{message}"),
            RunEvent::Progress { .. } | RunEvent::Status { .. } => {}
        },
    }
    Ok(())
}

/// Starts a run on `controller`, streams its events until it ends and saves
/// the export under `args.output_dir`. Ctrl-C stops the run cooperatively and
/// whatever was collected so far is still written.
pub async fn execute(
    controller: &RunController,
    args: &CrawlArgs,
    output: OutputFormat,
) -> Result<CrawlSummary> {
    let (observer, mut events) = controller.subscribe();
    let ticket = match controller.start(&args.exam_id, &args.format) {
        Ok(ticket) => ticket,
        Err(err) => {
            controller.unsubscribe(observer);
            return Err(AppError::Control(err));
        }
    };

    let mut tracker = EventTracker::default();
    let finished = controller.join();
    tokio::pin!(finished);
    let mut listen_for_interrupt = true;
    loop {
        tokio::select! {
            _ = &mut finished => break,
            Some(event) = events.recv() => tracker.observe(&event, output)?,
            signal = tokio::signal::ctrl_c(), if listen_for_interrupt => match signal {
                Ok(()) => {
                    if let Err(err) = controller.stop().await {
                        warn!(error = %err, "interrupt arrived after the run ended");
                    }
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "cannot listen for Ctrl-C");
                    listen_for_interrupt = false;
                }
            },
        }
    }
    while let Ok(event) = events.try_recv() {
        tracker.observe(&event, output)?;
    }
    controller.unsubscribe(observer);

    let mut summary = CrawlSummary {
        session_id: ticket.session_id,
        exam_id: ticket.record_set_id,
        collected_count: controller.status().collected_count,
        stopped: tracker.stopped,
        artifact: None,
        artifact_bytes: None,
        failure: tracker.failure,
    };

    let artifact = controller
        .export_last()
        .filter(|artifact| tracker.filename.as_deref() == Some(artifact.filename.as_str()));
    if let Some(artifact) = artifact {
        tokio::fs::create_dir_all(&args.output_dir).await?;
        let path = args.output_dir.join(&artifact.filename);
        tokio::fs::write(&path, &artifact.content).await?;
        summary.artifact_bytes = Some(artifact.content.len());
        summary.artifact = Some(path);
    }
    Ok(summary)
}
