use crate::events::{EventBus, PipelineEvent};
use recap_core::provider::ModelProvider;
use recap_core::schema::{CaptureDescription, CaptureScreenshot};
use recap_core::{AppConfig, Database, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drains the backlog of undescribed screenshots through the vision
/// provider in fixed-size batches, pausing between batches to stay under
/// provider rate limits.
pub struct QueueProcessor {
    db: Arc<Mutex<Database>>,
    vision: Arc<dyn ModelProvider>,
    prompt: String,
    batch_size: usize,
    batch_delay: Duration,
    drain_lock: tokio::sync::Mutex<()>,
    events: EventBus,
}

impl QueueProcessor {
    pub fn new(
        db: Arc<Mutex<Database>>,
        vision: Arc<dyn ModelProvider>,
        config: &AppConfig,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            vision,
            prompt: config.description.prompt.clone(),
            batch_size: config.queue.batch_size.max(1),
            batch_delay: Duration::from_secs(config.queue.batch_delay_seconds),
            drain_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Describes every undescribed screenshot currently in the queue, oldest
    /// first. Concurrent calls are serialized; the second caller waits and
    /// then sees an already-drained queue.
    pub async fn drain(&self) -> Result<Vec<CaptureDescription>> {
        let _guard = self.drain_lock.lock().await;
        let pending = self.lock_db().get_unprocessed_captures()?;
        self.process(pending).await
    }

    /// Describes a pre-selected set of screenshots with the same batching
    /// and pacing as a full drain.
    pub async fn drain_items(
        &self,
        items: Vec<CaptureScreenshot>,
    ) -> Result<Vec<CaptureDescription>> {
        let _guard = self.drain_lock.lock().await;
        self.process(items).await
    }

    async fn process(&self, items: Vec<CaptureScreenshot>) -> Result<Vec<CaptureDescription>> {
        let mut described = Vec::new();
        if items.is_empty() {
            self.events
                .send(PipelineEvent::QueueCompleted { described: 0 });
            return Ok(described);
        }

        let total_batches = items.len().div_ceil(self.batch_size);
        info!(
            pending = items.len(),
            batches = total_batches,
            "draining description queue"
        );

        for (batch_index, batch) in items.chunks(self.batch_size).enumerate() {
            debug!(
                batch = batch_index + 1,
                of = total_batches,
                size = batch.len(),
                "processing batch"
            );

            for item in batch {
                if item.filename.is_empty() {
                    warn!(
                        screenshot_id = item.screenshot_id,
                        "screenshot has no filename, skipping"
                    );
                    continue;
                }

                let text = match self
                    .vision
                    .describe_screenshot(&item.filename, &self.prompt)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            screenshot_id = item.screenshot_id,
                            filename = %item.filename,
                            error = %e,
                            "description failed, leaving in queue"
                        );
                        continue;
                    }
                };

                // Persist immediately so a crash mid-drain loses at most the
                // in-flight item.
                let stored = self.lock_db().update_description(
                    item.screenshot_id,
                    &text,
                    self.vision.api_name(),
                    self.vision.model_name(),
                );
                if let Err(e) = stored {
                    warn!(
                        screenshot_id = item.screenshot_id,
                        error = %e,
                        "failed to store description"
                    );
                }

                described.push(CaptureDescription {
                    capture_id: item.capture_id,
                    timestamp: item.timestamp,
                    description: text,
                });
            }

            if batch_index + 1 < total_batches {
                debug!(
                    delay_secs = self.batch_delay.as_secs(),
                    "pausing before next batch"
                );
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        info!(described = described.len(), "description queue drained");
        self.events.send(PipelineEvent::QueueCompleted {
            described: described.len(),
        });
        Ok(described)
    }

    fn lock_db(&self) -> std::sync::MutexGuard<'_, Database> {
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockProvider;
    use recap_core::schema::ScreenshotPair;

    fn test_config(batch_size: usize, batch_delay_seconds: u64) -> AppConfig {
        let mut config = AppConfig::default();
        config.queue.batch_size = batch_size;
        config.queue.batch_delay_seconds = batch_delay_seconds;
        config
    }

    fn seed_captures(db: &Arc<Mutex<Database>>, count: usize) {
        let mut db = db.lock().unwrap();
        for i in 0..count {
            let pair = ScreenshotPair {
                filename: format!("shot_{i}.png"),
                thumb_filename: None,
            };
            db.insert_capture(1_700_000_000 + i as i64, &[pair]).unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drains_everything_across_batches() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        seed_captures(&db, 17);
        let provider = Arc::new(MockProvider::new());
        let config = test_config(15, 60);
        let queue = QueueProcessor::new(db.clone(), provider.clone(), &config, EventBus::new());

        let described = queue.drain().await.unwrap();
        assert_eq!(described.len(), 17);
        assert_eq!(provider.vision_calls(), 17);

        // Everything is persisted with the producing provider stamped.
        {
            let db = db.lock().unwrap();
            assert!(db.get_unprocessed_captures().unwrap().is_empty());
            let rows = db.get_recent_captures(100).unwrap();
            assert_eq!(rows.len(), 17);
            for row in rows {
                assert!(row.description.is_some());
                assert_eq!(row.provider.as_deref(), Some("mock"));
                assert_eq!(row.model.as_deref(), Some("mock-model"));
            }
        }

        // A second drain finds nothing.
        let again = queue.drain().await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_batches_but_not_after_the_last() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        seed_captures(&db, 7);
        let provider = Arc::new(MockProvider::new());
        let config = test_config(3, 60);
        let queue = QueueProcessor::new(db.clone(), provider.clone(), &config, EventBus::new());

        let start = tokio::time::Instant::now();
        let described = queue.drain().await.unwrap();
        let elapsed = start.elapsed();

        // 7 items in batches of 3 is 3 batches, so exactly 2 pauses.
        assert_eq!(described.len(), 7);
        assert_eq!(elapsed, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn single_batch_finishes_without_pausing() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        seed_captures(&db, 3);
        let provider = Arc::new(MockProvider::new());
        let config = test_config(15, 60);
        let queue = QueueProcessor::new(db.clone(), provider.clone(), &config, EventBus::new());

        let start = tokio::time::Instant::now();
        queue.drain().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_items_stay_in_queue() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        seed_captures(&db, 3);
        let provider = Arc::new(MockProvider::new());
        provider.fail_on("shot_1.png");
        let config = test_config(15, 60);
        let queue = QueueProcessor::new(db.clone(), provider.clone(), &config, EventBus::new());

        let described = queue.drain().await.unwrap();
        assert_eq!(described.len(), 2);

        let remaining = db.lock().unwrap().get_unprocessed_captures().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].filename, "shot_1.png");
    }

    #[tokio::test(start_paused = true)]
    async fn emits_completion_event() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        seed_captures(&db, 2);
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let provider = Arc::new(MockProvider::new());
        let config = test_config(15, 60);
        let queue = QueueProcessor::new(db, provider, &config, events);

        queue.drain().await.unwrap();
        match rx.recv().await.unwrap() {
            PipelineEvent::QueueCompleted { described } => assert_eq!(described, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_drains_do_not_double_describe() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        seed_captures(&db, 4);
        let provider = Arc::new(MockProvider::new());
        let config = test_config(15, 60);
        let queue = Arc::new(QueueProcessor::new(
            db,
            provider.clone(),
            &config,
            EventBus::new(),
        ));

        let a = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await.unwrap().len() })
        };
        let b = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await.unwrap().len() })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a + b, 4);
        assert_eq!(provider.vision_calls(), 4);
    }
}
