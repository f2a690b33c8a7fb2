use crate::events::{EventBus, PipelineEvent, TimerKind};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Factory for the future a timer runs on each tick. A fresh future is built
/// per tick so the callback can own its captured state across awaits.
pub type TimerCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct TimerTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Repeating timer with immediate-stop semantics. Ticks are serialized: a
/// slow callback delays the next tick instead of overlapping it.
pub struct Timer {
    running: AtomicBool,
    task: Mutex<Option<TimerTask>>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Starts ticking every `interval`, replacing any previous tick source.
    /// The first callback runs one full interval after start, not immediately.
    pub fn start(&self, interval: Duration, callback: TimerCallback) {
        self.stop();

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of `interval` completes immediately; consume it
            // so the schedule begins one interval from now.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = ticker.tick() => {
                        callback().await;
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        let mut slot = match self.task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(TimerTask { stop_tx, handle });
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stops future ticks. An in-flight callback is allowed to finish; it is
    /// never aborted mid-run. Stopping an idle timer is a no-op.
    pub fn stop(&self) {
        let task = {
            let mut slot = match self.task.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        if let Some(task) = task {
            let _ = task.stop_tx.send(true);
            // The loop observes the stop signal and exits on its own; the
            // handle is dropped rather than aborted so a running callback
            // completes.
            drop(task.handle);
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the two process-lifetime timers and reports state transitions on the
/// event bus.
pub struct Scheduler {
    screenshot: Timer,
    description: Timer,
    events: EventBus,
}

impl Scheduler {
    pub fn new(events: EventBus) -> Self {
        Self {
            screenshot: Timer::new(),
            description: Timer::new(),
            events,
        }
    }

    pub fn start_timer(&self, kind: TimerKind, interval: Duration, callback: TimerCallback) {
        if interval.is_zero() {
            debug!(timer = %kind, "interval is zero, not starting timer");
            return;
        }
        info!(timer = %kind, interval_secs = interval.as_secs(), "starting timer");
        self.timer(kind).start(interval, callback);
        self.events.send(PipelineEvent::TimerStateChanged {
            timer: kind,
            running: true,
        });
    }

    pub fn stop_timer(&self, kind: TimerKind) {
        let timer = self.timer(kind);
        if !timer.is_running() {
            return;
        }
        info!(timer = %kind, "stopping timer");
        timer.stop();
        self.events.send(PipelineEvent::TimerStateChanged {
            timer: kind,
            running: false,
        });
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.timer(kind).is_running()
    }

    pub fn stop_all(&self) {
        self.stop_timer(TimerKind::Screenshot);
        self.stop_timer(TimerKind::Description);
    }

    fn timer(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::Screenshot => &self.screenshot,
            TimerKind::Description => &self.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(count: Arc<AtomicUsize>) -> TimerCallback {
        Arc::new(move || {
            let count = count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_fires_after_one_interval() {
        let timer = Timer::new();
        let count = Arc::new(AtomicUsize::new(0));
        timer.start(Duration::from_secs(60), counting_callback(count.clone()));
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(59)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_future_ticks() {
        let timer = Timer::new();
        let count = Arc::new(AtomicUsize::new(0));
        timer.start(Duration::from_secs(10), counting_callback(count.clone()));
        tokio::task::yield_now().await;

        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(10)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);

        timer.stop();
        assert!(!timer.is_running());
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(10)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn double_stop_is_a_no_op() {
        let timer = Timer::new();
        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_previous_tick_source() {
        let timer = Timer::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timer.start(Duration::from_secs(10), counting_callback(first.clone()));
        timer.start(Duration::from_secs(10), counting_callback(second.clone()));
        tokio::task::yield_now().await;

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(10)).await;
            tokio::task::yield_now().await;
        }

        // Only the replacement callback fires after the restart.
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 3);
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callbacks_never_overlap() {
        let timer = Timer::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));

        let callback: TimerCallback = {
            let active = active.clone();
            let overlapped = overlapped.clone();
            Arc::new(move || {
                let active = active.clone();
                let overlapped = overlapped.clone();
                Box::pin(async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    // Runs longer than the tick interval.
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
        };

        timer.start(Duration::from_secs(10), callback);
        tokio::task::yield_now().await;
        for _ in 0..12 {
            tokio::time::advance(Duration::from_secs(10)).await;
            tokio::task::yield_now().await;
        }

        assert!(!overlapped.load(Ordering::SeqCst));
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_reports_state_transitions() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let scheduler = Scheduler::new(events);
        let count = Arc::new(AtomicUsize::new(0));

        scheduler.start_timer(
            TimerKind::Description,
            Duration::from_secs(60),
            counting_callback(count),
        );
        assert!(scheduler.is_running(TimerKind::Description));
        assert!(!scheduler.is_running(TimerKind::Screenshot));

        scheduler.stop_timer(TimerKind::Description);
        assert!(!scheduler.is_running(TimerKind::Description));

        match rx.recv().await.unwrap() {
            PipelineEvent::TimerStateChanged { timer, running } => {
                assert_eq!(timer, TimerKind::Description);
                assert!(running);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            PipelineEvent::TimerStateChanged { running, .. } => assert!(!running),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_does_not_start() {
        let scheduler = Scheduler::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.start_timer(
            TimerKind::Screenshot,
            Duration::ZERO,
            counting_callback(count),
        );
        assert!(!scheduler.is_running(TimerKind::Screenshot));
    }
}
