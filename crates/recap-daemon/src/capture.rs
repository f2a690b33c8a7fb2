use crate::events::{EventBus, PipelineEvent};
use chrono::Utc;
use recap_core::schema::ScreenshotPair;
use recap_core::{AppConfig, CoreError, Database, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Takes screenshots by shelling out to a user-configured command, e.g.
/// `grim {output}` on Wayland or `scrot {output}` on X11. `{output}` is
/// replaced with the destination path; if absent, the path is appended.
pub struct CaptureBackend {
    command: String,
    screenshots_dir: PathBuf,
    timeout: Duration,
}

impl CaptureBackend {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            command: config.capture.command.clone(),
            screenshots_dir: config.screenshots_dir()?,
            timeout: CAPTURE_TIMEOUT,
        })
    }

    pub async fn take_screenshot(&self) -> Result<ScreenshotPair> {
        let filename = format!("recap_{}.png", Utc::now().format("%Y%m%d_%H%M%S%3f"));
        let output_path = self.screenshots_dir.join(&filename);
        let (program, args) = self.build_command(&output_path.to_string_lossy())?;

        let child = tokio::process::Command::new(&program)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // A hung capture command must not outlive the timed-out tick.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::Capture(format!("failed to spawn {program}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CoreError::Capture(format!("{program} timed out")))?
            .map_err(|e| CoreError::Capture(format!("{program} failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Capture(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if !output_path.exists() {
            return Err(CoreError::Capture(format!(
                "{program} succeeded but produced no file at {}",
                output_path.display()
            )));
        }

        Ok(ScreenshotPair {
            filename,
            thumb_filename: None,
        })
    }

    fn build_command(&self, output_path: &str) -> Result<(String, Vec<String>)> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CoreError::Capture("capture command is empty".to_string()))?
            .to_string();

        let mut args: Vec<String> = parts
            .map(|arg| arg.replace("{output}", output_path))
            .collect();
        if !self.command.contains("{output}") {
            args.push(output_path.to_string());
        }
        Ok((program, args))
    }
}

/// Takes one screenshot and records it as a new capture. Used by both the
/// scheduled timer and the one-shot CLI command.
pub async fn capture_once(
    backend: &CaptureBackend,
    db: &Arc<Mutex<Database>>,
    events: &EventBus,
) -> Result<i64> {
    let pair = backend.take_screenshot().await?;
    let capture_id = {
        let mut db = match db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        db.insert_capture(Utc::now().timestamp(), &[pair.clone()])?
    };
    info!(capture_id, filename = %pair.filename, "screenshot captured");
    events.send(PipelineEvent::ScreenshotTaken { capture_id });
    Ok(capture_id)
}

/// Timer-callback wrapper: a failed capture is logged and skipped so the
/// schedule keeps running.
pub async fn capture_tick(backend: &CaptureBackend, db: &Arc<Mutex<Database>>, events: &EventBus) {
    if let Err(e) = capture_once(backend, db, events).await {
        warn!(error = %e, "scheduled capture failed");
    }
}
