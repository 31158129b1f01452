use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Queue of object keys waiting for reconciliation
///
/// A key is handed to at most one worker at a time. Adding a key that is
/// already queued is a no-op; adding a key that is being processed defers it
/// until the worker calls [`WorkQueue::done`].
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a key
    fn add(&self, key: &str);

    /// Wait for the next key. Returns `None` once the queue is shut down.
    async fn get(&self) -> Option<String>;

    /// Mark a key handed out by `get` as finished
    fn done(&self, key: &str);

    /// Clear the backoff history of a key
    fn forget(&self, key: &str);

    /// Enqueue a key after its current backoff delay
    fn add_rate_limited(&self, key: &str);

    /// Enqueue a key once `delay` has elapsed
    fn add_after(&self, key: &str, delay: Duration);

    /// How often a key was re-queued since it was last forgotten
    fn num_requeues(&self, key: &str) -> u32;

    /// Number of keys waiting to be picked up
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake all waiting workers
    fn shut_down(&self);

    fn is_shutting_down(&self) -> bool;
}

/// Computes per-key retry delays
pub trait RateLimiter: Send + Sync {
    /// Delay before the key may be retried; counts as one failure
    fn when(&self, key: &str) -> Duration;

    fn forget(&self, key: &str);

    fn num_requeues(&self, key: &str) -> u32;
}

/// Per-key exponential backoff: `base_delay * 2^failures`, capped at `max_delay`
pub struct ItemExponentialFailureRateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ItemExponentialFailureRateLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ItemExponentialFailureRateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

impl RateLimiter for ItemExponentialFailureRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);

        2u32.checked_pow(exp)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |backoff| backoff.min(self.max_delay))
    }

    fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    shutting_down: bool,
}

#[derive(Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl QueueInner {
    fn add(&self, key: &str) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }
}

/// In-process rate-limited work queue
pub struct RateLimitingQueue {
    inner: Arc<QueueInner>,
    rate_limiter: Box<dyn RateLimiter>,
}

impl RateLimitingQueue {
    pub fn new(rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(QueueInner::default()),
            rate_limiter,
        }
    }

    /// Queue with per-key exponential backoff between the given bounds
    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(Box::new(ItemExponentialFailureRateLimiter::new(
            base_delay, max_delay,
        )))
    }
}

impl Default for RateLimitingQueue {
    fn default() -> Self {
        Self::new(Box::new(ItemExponentialFailureRateLimiter::default()))
    }
}

#[async_trait]
impl WorkQueue for RateLimitingQueue {
    fn add(&self, key: &str) {
        self.inner.add(key);
    }

    async fn get(&self) -> Option<String> {
        loop {
            // Register interest before inspecting the state so a concurrent
            // add or shut_down cannot slip in unnoticed
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn done(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    fn forget(&self, key: &str) {
        self.rate_limiter.forget(key);
    }

    fn add_rate_limited(&self, key: &str) {
        let delay = self.rate_limiter.when(key);
        debug!("Re-queuing {} in {:?}", key, delay);
        self.add_after(key, delay);
    }

    fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.add(&key);
        });
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.rate_limiter.num_requeues(key)
    }

    fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_coalesces_pending_keys() {
        let queue = RateLimitingQueue::default();
        queue.add("ns/vm1");
        queue.add("ns/vm1");
        queue.add("ns/vm2");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("ns/vm1"));
        assert_eq!(queue.get().await.as_deref(), Some("ns/vm2"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_readded_while_processing_waits_for_done() {
        let queue = RateLimitingQueue::default();
        queue.add("ns/vm1");
        let key = queue.get().await.unwrap();

        queue.add("ns/vm1");
        assert_eq!(queue.len(), 0, "key must not be handed to a second worker");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("ns/vm1"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = RateLimitingQueue::default();
        queue.add("ns/vm1");
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_wakes_on_add() {
        let queue = Arc::new(RateLimitingQueue::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.add("ns/vm1");
        assert_eq!(waiter.await.unwrap().as_deref(), Some("ns/vm1"));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiters() {
        let queue = Arc::new(RateLimitingQueue::default());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        queue.shut_down();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }

        queue.add("ns/vm1");
        assert!(queue.is_empty(), "adds after shutdown are dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_delays_and_forget_resets() {
        let queue = RateLimitingQueue::with_backoff(
            Duration::from_millis(100),
            Duration::from_secs(10),
        );

        queue.add_rate_limited("ns/vm1");
        assert_eq!(queue.num_requeues("ns/vm1"), 1);
        assert!(queue.is_empty());

        let start = tokio::time::Instant::now();
        assert_eq!(queue.get().await.as_deref(), Some("ns/vm1"));
        assert!(start.elapsed() >= Duration::from_millis(100));
        queue.done("ns/vm1");

        queue.add_rate_limited("ns/vm1");
        assert_eq!(queue.num_requeues("ns/vm1"), 2);
        let start = tokio::time::Instant::now();
        assert_eq!(queue.get().await.as_deref(), Some("ns/vm1"));
        assert!(start.elapsed() >= Duration::from_millis(200));

        queue.forget("ns/vm1");
        assert_eq!(queue.num_requeues("ns/vm1"), 0);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let limiter =
            ItemExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1));

        assert_eq!(limiter.when("k"), Duration::from_millis(5));
        assert_eq!(limiter.when("k"), Duration::from_millis(10));
        assert_eq!(limiter.when("k"), Duration::from_millis(20));
        for _ in 0..40 {
            limiter.when("k");
        }
        assert_eq!(limiter.when("k"), Duration::from_secs(1));
        assert_eq!(limiter.when("other"), Duration::from_millis(5));
    }
}
