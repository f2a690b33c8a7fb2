use tokio::sync::broadcast;

/// Which of the two process-lifetime timers an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Screenshot,
    Description,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerKind::Screenshot => write!(f, "screenshot"),
            TimerKind::Description => write!(f, "description"),
        }
    }
}

/// Outbound fire-and-forget notifications for UI/tray consumers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ScreenshotTaken { capture_id: i64 },
    QueueCompleted { described: usize },
    TimerStateChanged { timer: TimerKind, running: bool },
    ReportGenerated { report_id: i64 },
}

/// Broadcast bus for pipeline events. Sending never blocks and succeeds
/// whether or not anyone is subscribed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn send(&self, event: PipelineEvent) {
        // No subscribers is fine; events are advisory only.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
