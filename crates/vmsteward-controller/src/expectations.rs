use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long an unfulfilled expectation may block syncs before it is ignored
pub const DEFAULT_EXPECTATIONS_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Pending creations and deletions for one controller key
#[derive(Debug, Clone)]
struct Expectation {
    add: i64,
    del: i64,
    timestamp: Instant,
}

impl Expectation {
    fn fulfilled(&self) -> bool {
        self.add <= 0 && self.del <= 0
    }
}

/// Tracks child creations/deletions the controller dispatched but has not
/// yet seen in its cache.
///
/// Every counter lives behind a single mutex; callers only get the atomic
/// expect/observe/query operations.
#[derive(Debug)]
pub struct ControllerExpectations {
    records: Mutex<HashMap<String, Expectation>>,
    timeout: Duration,
}

impl Default for ControllerExpectations {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerExpectations {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_EXPECTATIONS_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Replace the expectations for `key` with `add` creations and `del` deletions
    pub fn set_expectations(&self, key: &str, add: i64, del: i64) {
        debug!("Setting expectations for {}: add={}, del={}", key, add, del);
        self.records.lock().insert(
            key.to_string(),
            Expectation {
                add,
                del,
                timestamp: Instant::now(),
            },
        );
    }

    pub fn expect_creations(&self, key: &str, adds: i64) {
        self.set_expectations(key, adds, 0);
    }

    pub fn expect_deletions(&self, key: &str, dels: i64) {
        self.set_expectations(key, 0, dels);
    }

    pub fn creation_observed(&self, key: &str) {
        self.lower_expectations(key, 1, 0);
    }

    pub fn deletion_observed(&self, key: &str) {
        self.lower_expectations(key, 0, 1);
    }

    fn lower_expectations(&self, key: &str, add: i64, del: i64) {
        if let Some(exp) = self.records.lock().get_mut(key) {
            exp.add -= add;
            exp.del -= del;
            debug!(
                "Lowered expectations for {}: add={}, del={}",
                key, exp.add, exp.del
            );
        }
    }

    /// True when every dispatched action for `key` has been observed, the
    /// record has expired, or no record exists at all.
    pub fn satisfied_expectations(&self, key: &str) -> bool {
        match self.records.lock().get(key) {
            Some(exp) if exp.fulfilled() => true,
            Some(exp) if exp.timestamp.elapsed() > self.timeout => {
                debug!("Expectations for {} expired", key);
                true
            }
            Some(exp) => {
                debug!(
                    "Controller {} still waiting on expectations: add={}, del={}",
                    key, exp.add, exp.del
                );
                false
            }
            None => true,
        }
    }

    pub fn delete_expectations(&self, key: &str) {
        self.records.lock().remove(key);
    }
}

/// Expectations that remember which child keys are expected to disappear, so
/// deletions of unrelated children do not satisfy them.
#[derive(Debug, Default)]
pub struct UidTrackingExpectations {
    expectations: ControllerExpectations,
    deleted_keys: Mutex<HashMap<String, HashSet<String>>>,
}

impl UidTrackingExpectations {
    pub fn new(expectations: ControllerExpectations) -> Self {
        Self {
            expectations,
            deleted_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn expect_creations(&self, key: &str, adds: i64) {
        self.expectations.expect_creations(key, adds);
    }

    pub fn creation_observed(&self, key: &str) {
        self.expectations.creation_observed(key);
    }

    /// Expect the children named by `child_keys` to be deleted
    pub fn expect_deletions(&self, key: &str, child_keys: &[String]) {
        let mut deleted = self.deleted_keys.lock();
        let expected: HashSet<String> = child_keys.iter().cloned().collect();
        if let Some(stale) = deleted.insert(key.to_string(), expected) {
            if !stale.is_empty() {
                warn!("Clobbering pending deletions {:?} of {}", stale, key);
            }
        }
        self.expectations
            .expect_deletions(key, child_keys.len() as i64);
    }

    /// Record that `child_key` is gone; only counts if it was expected
    pub fn deletion_observed(&self, key: &str, child_key: &str) {
        let mut deleted = self.deleted_keys.lock();
        let Some(tracked) = deleted.get_mut(key) else {
            return;
        };
        if tracked.remove(child_key) {
            debug!("Observed expected deletion of {} for {}", child_key, key);
            self.expectations.deletion_observed(key);
        }
        if tracked.is_empty() {
            deleted.remove(key);
        }
    }

    pub fn satisfied_expectations(&self, key: &str) -> bool {
        self.expectations.satisfied_expectations(key)
    }

    /// Forget everything about `key`
    pub fn delete_expectations(&self, key: &str) {
        self.deleted_keys.lock().remove(key);
        self.expectations.delete_expectations(key);
    }
}
