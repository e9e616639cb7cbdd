//! Pagination-driven record extraction.
//!
//! Each record goes through name, detail, collect and advance steps. Soft faults
//! (missing optional elements) fall back to defaults; hard faults trigger a
//! forced advance past the record, or end the loop when no enabled "next"
//! control exists.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::AuthenticatedContext;
use crate::automation::{Automation, AutomationError, AutomationResult, WaitCondition};
use crate::config::CrawlerConfig;
use crate::events::RunEmitter;
use crate::record::{CollectedSet, Record};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to open {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: AutomationError,
    },
    #[error("browser session lost while reading pagination: {0}")]
    Discovery(#[source] AutomationError),
}

pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every record index was visited.
    Completed,
    /// Cancellation was observed at a record boundary.
    Stopped,
    /// A hard fault occurred and no enabled "next" control was available.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionOutcome {
    pub total: usize,
    pub collected_count: usize,
    pub termination: Termination,
}

/// Reads the pagination indicator: `"n/total"` or a bare integer. Anything
/// missing, unparsable or not positive counts as a single record.
pub fn parse_pagination_total(text: Option<&str>) -> usize {
    let Some(text) = text.map(str::trim).filter(|text| !text.is_empty()) else {
        return 1;
    };
    let candidate = if text.contains('/') {
        text.split('/').nth(1).unwrap_or_default()
    } else {
        text
    };
    match candidate.trim().parse::<i64>() {
        Ok(total) if total > 0 => usize::try_from(total).unwrap_or(1),
        _ => 1,
    }
}

pub struct Extractor {
    config: Arc<CrawlerConfig>,
}

impl Extractor {
    pub fn new(config: Arc<CrawlerConfig>) -> Self {
        Self { config }
    }

    pub async fn extract(
        &self,
        context: &mut AuthenticatedContext,
        record_set_id: &str,
        collected: &CollectedSet,
        cancel: &CancellationToken,
        emitter: &RunEmitter,
    ) -> ExtractionResult<ExtractionOutcome> {
        let automation = context.automation();
        let url = self.config.target.record_set_url(record_set_id);

        emitter.progress(0.0, format!("Opening exam {record_set_id}: {url}"));
        automation
            .navigate(&url)
            .await
            .map_err(|source| ExtractionError::Navigation {
                url: url.clone(),
                source,
            })?;
        pause(self.config.timing.page_settle()).await;

        let total = self.discover_total(automation, emitter).await?;
        let mut collected_count = 0;
        let mut termination = Termination::Completed;

        for index in 0..total {
            let fraction = (index + 1) as f64 / total as f64;
            if cancel.is_cancelled() {
                emitter.progress(fraction, "Crawl stopped.");
                termination = Termination::Stopped;
                break;
            }
            emitter.progress(fraction, format!("Processing record {}/{total}...", index + 1));

            let mut step = RecordStep {
                automation: &mut *automation,
                config: &self.config,
                emitter,
                index,
                total,
                fraction,
                collected_count: &mut collected_count,
            };
            let Err(fault) = step.run(collected).await else {
                continue;
            };

            emitter.progress(fraction, format!("Record {} failed: {fault}", index + 1));
            if index + 1 < total && !self.force_advance(automation, fraction, emitter).await {
                termination = Termination::Aborted;
                break;
            }
        }

        emitter.progress(
            1.0,
            format!("Crawl finished. Collected {collected_count} records."),
        );
        info!(
            record_set_id,
            total,
            collected = collected_count,
            termination = ?termination,
            "extraction finished"
        );
        Ok(ExtractionOutcome {
            total,
            collected_count,
            termination,
        })
    }

    async fn discover_total(
        &self,
        automation: &mut dyn Automation,
        emitter: &RunEmitter,
    ) -> ExtractionResult<usize> {
        let lookup = async {
            let element = automation
                .locate(
                    &self.config.selectors.pagination,
                    WaitCondition::Present,
                    self.config.timing.default_wait(),
                )
                .await?;
            automation.read_text(&element).await
        };
        match lookup.await {
            Ok(text) => {
                let total = parse_pagination_total(text.as_deref());
                debug!(raw = ?text, total, "pagination parsed");
                emitter.progress(0.0, format!("Found {total} records."));
                Ok(total)
            }
            Err(err) if err.is_session_lost() => Err(ExtractionError::Discovery(err)),
            Err(err) => {
                emitter.progress(
                    0.0,
                    format!("Pagination lookup failed ({err}), processing a single record."),
                );
                Ok(1)
            }
        }
    }

    /// Clicks the "next" control when it exists and is enabled. Returns false
    /// when the loop has to end.
    async fn force_advance(
        &self,
        automation: &mut dyn Automation,
        fraction: f64,
        emitter: &RunEmitter,
    ) -> bool {
        let selector = self.config.selectors.enabled_next_button();
        let attempt = match automation
            .locate(&selector, WaitCondition::Present, Duration::ZERO)
            .await
        {
            Ok(next) => automation.click(&next).await,
            Err(err) if err.is_timeout() => {
                emitter.progress(fraction, "Next button disabled or missing. Aborting.");
                return false;
            }
            Err(err) => Err(err),
        };

        match attempt {
            Ok(()) => {
                emitter.progress(fraction, "Forced advance to the next record after error.");
                pause(self.config.timing.advance_settle()).await;
                true
            }
            Err(err) => {
                emitter.progress(
                    fraction,
                    format!("Additional error during forced advance ({err}). Aborting."),
                );
                false
            }
        }
    }
}

/// Work for a single record index.
struct RecordStep<'a> {
    automation: &'a mut dyn Automation,
    config: &'a CrawlerConfig,
    emitter: &'a RunEmitter,
    index: usize,
    total: usize,
    fraction: f64,
    collected_count: &'a mut usize,
}

impl RecordStep<'_> {
    async fn run(&mut self, collected: &CollectedSet) -> AutomationResult<()> {
        let name = self.read_name().await?;
        self.emitter.progress(self.fraction, format!("Name: {name}"));

        let mut detail = String::new();
        match self.read_detail(&mut detail).await {
            Ok(()) => {}
            Err(err) if err.is_session_lost() => return Err(err),
            Err(err) if err.is_timeout() => self.emitter.progress(
                self.fraction,
                format!("{name}: timed out collecting detail (entry may be missing)"),
            ),
            Err(err) => self.emitter.progress(
                self.fraction,
                format!("{name}: error collecting detail - {err}"),
            ),
        }

        let preview = if detail.is_empty() {
            "none".to_string()
        } else {
            truncate(&detail, 30)
        };
        collected.push(Record::new(name.clone(), detail));
        *self.collected_count += 1;
        self.emitter.log(format!("Collected: name={name}, link={preview}..."));

        match self.close_secondary_modal().await {
            Ok(()) => {}
            Err(err) if err.is_session_lost() => return Err(err),
            Err(err) if err.is_timeout() => {}
            Err(err) => self.emitter.progress(
                self.fraction,
                format!("{name}: error closing second modal - {err}"),
            ),
        }

        if self.index + 1 < self.total {
            let wait = self.config.timing.default_wait();
            let next = self
                .automation
                .locate(&self.config.selectors.next_button, WaitCondition::Clickable, wait)
                .await?;
            self.automation.click(&next).await?;
            self.emitter.progress(self.fraction, "Moving to the next record.");
            pause(self.config.timing.advance_settle()).await;
        }
        Ok(())
    }

    async fn read_name(&mut self) -> AutomationResult<String> {
        let lookup = async {
            let element = self
                .automation
                .locate(
                    &self.config.selectors.record_name,
                    WaitCondition::Visible,
                    self.config.timing.default_wait(),
                )
                .await?;
            self.automation.read_text(&element).await
        };
        match lookup.await {
            Ok(text) => Ok(text
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| Record::placeholder_name(self.index))),
            Err(err) if err.is_session_lost() => Err(err),
            Err(err) => {
                debug!(index = self.index, error = %err, "name unavailable, using placeholder");
                Ok(Record::placeholder_name(self.index))
            }
        }
    }

    /// Fills `detail` as soon as the text is read so a failure closing the
    /// modal keeps it.
    async fn read_detail(&mut self, detail: &mut String) -> AutomationResult<()> {
        let selectors = &self.config.selectors;
        let timing = &self.config.timing;
        let wait = timing.default_wait();

        let button = self
            .automation
            .locate(&selectors.detail_button, WaitCondition::Clickable, wait)
            .await?;
        self.automation.click(&button).await?;
        self.emitter.progress(self.fraction, "Detail button clicked.");
        pause(timing.action_settle()).await;

        let text = self
            .automation
            .locate(&selectors.detail_text, WaitCondition::Visible, wait)
            .await?;
        *detail = self
            .automation
            .read_text(&text)
            .await?
            .map(|text| text.trim().to_string())
            .unwrap_or_default();
        self.emitter.progress(
            self.fraction,
            format!("Detail collected: {}...", truncate(detail, 50)),
        );

        let close = self
            .automation
            .locate(&selectors.detail_close, WaitCondition::Clickable, wait)
            .await?;
        self.automation.click(&close).await?;
        self.emitter.progress(self.fraction, "First modal closed.");
        pause(timing.action_settle()).await;
        Ok(())
    }

    async fn close_secondary_modal(&mut self) -> AutomationResult<()> {
        let close = self
            .automation
            .locate(
                &self.config.selectors.secondary_modal_close,
                WaitCondition::Clickable,
                self.config.timing.short_wait(),
            )
            .await?;
        self.automation.click(&close).await?;
        self.emitter.progress(self.fraction, "Second modal closed.");
        pause(self.config.timing.action_settle()).await;
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_accepts_fraction_and_bare_forms() {
        assert_eq!(parse_pagination_total(Some("3/10")), 10);
        assert_eq!(parse_pagination_total(Some(" 1 / 25 ")), 25);
        assert_eq!(parse_pagination_total(Some("7")), 7);
    }

    #[test]
    fn pagination_defaults_to_single_record() {
        assert_eq!(parse_pagination_total(None), 1);
        assert_eq!(parse_pagination_total(Some("")), 1);
        assert_eq!(parse_pagination_total(Some("   ")), 1);
        assert_eq!(parse_pagination_total(Some("garbage")), 1);
        assert_eq!(parse_pagination_total(Some("3/")), 1);
        assert_eq!(parse_pagination_total(Some("0")), 1);
        assert_eq!(parse_pagination_total(Some("2/-4")), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("블로그 링크", 3), "블로그");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
