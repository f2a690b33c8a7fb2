use serde::{Deserialize, Serialize};

// -- Database model types --

/// One screenshot-taking event. `report_id` is set once the capture has been
/// rolled into a report; NULL means "not yet reported".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub capture_id: i64,
    pub report_id: Option<i64>,
    pub timestamp: i64,
}

/// Queue row: a capture joined with one of its screenshot artifacts.
/// `description == None` is the queue-membership predicate — the batch
/// processor selects exactly the rows where this holds. `provider` and
/// `model` record which backend produced the description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureScreenshot {
    pub capture_id: i64,
    pub timestamp: i64,
    pub screenshot_id: i64,
    pub filename: String,
    pub thumb_filename: Option<String>,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// A capture together with its (non-null) description text. Produced by the
/// queue processor and consumed by the report generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureDescription {
    pub capture_id: i64,
    pub timestamp: i64,
    pub description: String,
}

/// One generated summary. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub report_id: i64,
    pub timestamp: i64,
    pub content: String,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Full/thumbnail filename pair for one display surface of a capture.
#[derive(Debug, Clone)]
pub struct ScreenshotPair {
    pub filename: String,
    pub thumb_filename: Option<String>,
}
