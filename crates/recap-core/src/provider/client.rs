use crate::error::{CoreError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Lazily created HTTP connection with an inactivity deadline.
///
/// Every concrete provider wraps its `reqwest::Client` in one of these:
/// `connect()` returns the existing client or creates one under the lock,
/// and `touch()` after every use (re)arms a watchdog that drops the client
/// once the idle window elapses without another touch. The next `connect()`
/// transparently rebuilds it.
#[derive(Clone)]
pub struct IdleClient {
    inner: Arc<Inner>,
}

struct Inner {
    slot: Mutex<Option<reqwest::Client>>,
    deadline: Mutex<Option<Instant>>,
    watchdog_live: AtomicBool,
    idle_window: Duration,
    generation: AtomicU64,
}

impl IdleClient {
    pub fn new(idle_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                deadline: Mutex::new(None),
                watchdog_live: AtomicBool::new(false),
                idle_window,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Return the current client, creating it if absent. Double-checked
    /// under the lock: concurrent callers never build two clients.
    pub fn connect(&self) -> Result<reqwest::Client> {
        let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CoreError::Provider(format!("failed to create http client: {e}")))?;

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *slot = Some(client.clone());
        debug!(
            generation = self.inner.generation.load(Ordering::SeqCst),
            "created provider connection"
        );
        Ok(client)
    }

    /// Reset the inactivity deadline. Called after every provider
    /// operation; safe to invoke from concurrent completions. At most one
    /// watchdog task runs at a time — a second touch moves the deadline
    /// instead of stacking another timer.
    pub fn touch(&self) {
        {
            let mut deadline = self
                .inner
                .deadline
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *deadline = Some(Instant::now() + self.inner.idle_window);
        }

        if !self.inner.watchdog_live.swap(true, Ordering::SeqCst) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                Self::watchdog(inner).await;
            });
        }
    }

    async fn watchdog(inner: Arc<Inner>) {
        loop {
            let wake_at = {
                let mut deadline = inner.deadline.lock().unwrap_or_else(|e| e.into_inner());
                match *deadline {
                    None => {
                        inner.watchdog_live.store(false, Ordering::SeqCst);
                        return;
                    }
                    Some(d) if Instant::now() >= d => {
                        let mut slot = inner.slot.lock().unwrap_or_else(|e| e.into_inner());
                        if slot.take().is_some() {
                            debug!("closing provider connection after inactivity");
                        }
                        *deadline = None;
                        inner.watchdog_live.store(false, Ordering::SeqCst);
                        return;
                    }
                    Some(d) => d,
                }
            };
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Whether a live connection currently exists.
    pub fn is_connected(&self) -> bool {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Number of connections created so far. A reused connection keeps the
    /// generation stable; a rebuild after idle teardown increments it.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reuses_connection_within_idle_window() {
        let client = IdleClient::new(Duration::from_secs(300));

        client.connect().unwrap();
        client.touch();
        assert_eq!(client.generation(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        client.connect().unwrap();
        client.touch();
        assert_eq!(client.generation(), 1, "second call 1s later must reuse");
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn recreates_connection_after_idle_window() {
        let client = IdleClient::new(Duration::from_secs(300));

        client.connect().unwrap();
        client.touch();

        tokio::time::advance(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert!(!client.is_connected(), "idle watchdog must drop the client");

        client.connect().unwrap();
        assert_eq!(client.generation(), 2, "post-teardown call sees a fresh connection");
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_rather_than_stacking() {
        let client = IdleClient::new(Duration::from_secs(300));
        client.connect().unwrap();
        client.touch();

        // Keep touching just inside the window; the deadline moves forward
        // and the single watchdog never fires.
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(200)).await;
            tokio::task::yield_now().await;
            assert!(client.is_connected());
            client.touch();
        }

        tokio::time::advance(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_client() {
        let client = IdleClient::new(Duration::from_secs(300));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = client.clone();
            handles.push(tokio::spawn(async move { c.connect().map(|_| ()) }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(client.generation(), 1);
    }
}
