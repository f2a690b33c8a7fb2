use crate::events::{EventBus, PipelineEvent};
use crate::queue::QueueProcessor;
use chrono::Utc;
use recap_core::provider::ModelProvider;
use recap_core::schema::CaptureDescription;
use recap_core::{AppConfig, CoreError, Database, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::info;

/// What a report should cover.
pub enum ReportSelection {
    /// Everything captured since UTC midnight that is not already in a report.
    Today,
    /// An explicit set of capture ids, described or not.
    Captures(Vec<i64>),
}

/// Turns described captures into a narrative report via the text provider
/// and records which captures each report covers.
pub struct ReportGenerator {
    db: Arc<Mutex<Database>>,
    text: Arc<dyn ModelProvider>,
    queue: Arc<QueueProcessor>,
    prompt: String,
    events: EventBus,
}

impl ReportGenerator {
    pub fn new(
        db: Arc<Mutex<Database>>,
        text: Arc<dyn ModelProvider>,
        queue: Arc<QueueProcessor>,
        config: &AppConfig,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            text,
            queue,
            prompt: config.report.prompt.clone(),
            events,
        }
    }

    /// Generates a report and returns its id. `Ok(None)` means there was
    /// nothing to report on for `Today`; an empty explicit selection is an
    /// error instead.
    pub async fn generate(&self, selection: ReportSelection) -> Result<Option<i64>> {
        let descriptions = match selection {
            ReportSelection::Today => {
                // Describe any backlog first so today's report sees it.
                self.queue.drain().await?;
                let descriptions = self.lock_db().get_described_captures_for_today()?;
                if descriptions.is_empty() {
                    info!("nothing to report on today");
                    return Ok(None);
                }
                descriptions
            }
            ReportSelection::Captures(ids) => {
                let rows = self.lock_db().get_captures_by_ids(&ids)?;
                let (ready, missing): (Vec<_>, Vec<_>) =
                    rows.into_iter().partition(|r| r.description.is_some());

                let mut descriptions: Vec<CaptureDescription> = ready
                    .into_iter()
                    .map(|r| CaptureDescription {
                        capture_id: r.capture_id,
                        timestamp: r.timestamp,
                        description: r.description.unwrap_or_default(),
                    })
                    .collect();
                descriptions.extend(self.queue.drain_items(missing).await?);

                if descriptions.is_empty() {
                    return Err(CoreError::EmptyReport);
                }
                descriptions
            }
        };

        let prompt = build_report_prompt(&self.prompt, &descriptions);
        let content = self.text.generate_text(&prompt).await?;

        let mut seen = HashSet::new();
        let capture_ids: Vec<i64> = descriptions
            .iter()
            .map(|d| d.capture_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let report_id = self.lock_db().log_report(
            Utc::now().timestamp(),
            &content,
            &capture_ids,
            self.text.api_name(),
            self.text.model_name(),
        )?;

        info!(
            report_id,
            captures = capture_ids.len(),
            "report generated"
        );
        self.events
            .send(PipelineEvent::ReportGenerated { report_id });
        Ok(Some(report_id))
    }

    fn lock_db(&self) -> std::sync::MutexGuard<'_, Database> {
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Builds the text-model prompt: the configured preamble followed by each
/// description wrapped in marker lines so the model can tell entries apart.
fn build_report_prompt(preamble: &str, descriptions: &[CaptureDescription]) -> String {
    let mut prompt = String::from(preamble);
    if !prompt.ends_with('\n') {
        prompt.push('\n');
    }
    for d in descriptions {
        prompt.push_str("BEGIN DESCRIPTION\n");
        prompt.push_str(&d.description);
        if !d.description.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push_str("END DESCRIPTION\n");
    }
    prompt
}
