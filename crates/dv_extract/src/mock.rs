//! In-process stand-in for the real social-network source.
//!
//! Serves fixed datasets with simulated latency and random failures. Tests
//! switch the randomness off and inject failures at fixed indices instead.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};

use crate::error::SourceError;
use crate::source::{DataKind, SourceDescriptor, SourceProvider};

const DEFAULT_MIN_LATENCY: Duration = Duration::from_millis(300);
const DEFAULT_MAX_LATENCY: Duration = Duration::from_millis(800);
const DEFAULT_FAILURE_RATE: f64 = 0.1;

pub fn dataset(kind: DataKind) -> Vec<Value> {
    match kind {
        DataKind::Friend => vec![
            json!({ "id": "12345678", "name": "John Doe", "mutual": 5 }),
            json!({ "id": "23456789", "name": "Jane Smith", "mutual": 8 }),
            json!({ "id": "34567890", "name": "Bob Johnson", "mutual": 3 }),
            json!({ "id": "45678901", "name": "Alice Williams", "mutual": 12 }),
            json!({ "id": "56789012", "name": "Charlie Brown", "mutual": 7 }),
        ],
        DataKind::Message => vec![
            json!({ "id": "78901234", "name": "Sarah Connor", "messages": 342 }),
            json!({ "id": "89012345", "name": "John Connor", "messages": 156 }),
            json!({ "id": "90123456", "name": "Kyle Reese", "messages": 78 }),
            json!({ "id": "01234567", "name": "Miles Dyson", "messages": 43 }),
        ],
        DataKind::Post => vec![
            json!({ "id": "post_12345", "author": "12345678", "text": "This is a post about technology", "likes": 15, "comments": 3 }),
            json!({ "id": "post_23456", "author": "23456789", "text": "Check out my new photos!", "likes": 42, "comments": 7 }),
            json!({ "id": "post_34567", "author": "34567890", "text": "Great day at the beach!", "likes": 28, "comments": 4 }),
        ],
        DataKind::Group => vec![
            json!({ "id": "group_12345", "name": "Tech Enthusiasts", "members": 1245 }),
            json!({ "id": "group_23456", "name": "Photography Club", "members": 342 }),
            json!({ "id": "group_34567", "name": "Beach Lovers", "members": 567 }),
        ],
    }
}

pub struct MockSource {
    descriptor: SourceDescriptor,
    items: Vec<Value>,
    min_latency: Duration,
    max_latency: Duration,
    failure_rate: f64,
    fail_at: HashSet<usize>,
    flaky_at: Mutex<HashSet<usize>>,
    unreachable: AtomicBool,
    fetch_log: Mutex<Vec<usize>>,
}

impl MockSource {
    /// The built-in dataset for `kind`, with default latency and failure rate.
    pub fn new(kind: DataKind, source: &str) -> Self {
        Self::with_items(kind.descriptor(source), dataset(kind))
    }

    pub fn with_items(descriptor: SourceDescriptor, items: Vec<Value>) -> Self {
        Self {
            descriptor,
            items,
            min_latency: DEFAULT_MIN_LATENCY,
            max_latency: DEFAULT_MAX_LATENCY,
            failure_rate: DEFAULT_FAILURE_RATE,
            fail_at: HashSet::new(),
            flaky_at: Mutex::new(HashSet::new()),
            unreachable: AtomicBool::new(false),
            fetch_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max.max(min);
        self
    }

    /// No latency and no random failures.
    pub fn deterministic(self) -> Self {
        self.with_latency(Duration::ZERO, Duration::ZERO)
            .with_failure_rate(0.0)
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    /// Every fetch of these indices fails.
    pub fn fail_at(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.fail_at.extend(indices);
        self
    }

    /// The first fetch of each of these indices fails; later ones succeed.
    pub fn flaky_at(self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.flaky_at.lock().extend(indices);
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every index passed to `fetch`, in call order, retries included.
    pub fn fetched_indices(&self) -> Vec<usize> {
        self.fetch_log.lock().clone()
    }

    fn check_reachable(&self) -> Result<(), SourceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable(format!(
                "{} is not reachable",
                self.descriptor.source
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for MockSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn len(&self) -> Result<usize, SourceError> {
        self.check_reachable()?;
        Ok(self.items.len())
    }

    async fn fetch(&self, index: usize) -> Result<Value, SourceError> {
        self.check_reachable()?;
        self.fetch_log.lock().push(index);

        let (latency, unlucky) = {
            let mut rng = rand::thread_rng();
            let latency = if self.max_latency > self.min_latency {
                rng.gen_range(self.min_latency..=self.max_latency)
            } else {
                self.min_latency
            };
            (latency, rng.gen_bool(self.failure_rate))
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.fail_at.contains(&index) || self.flaky_at.lock().remove(&index) || unlucky {
            return Err(SourceError::ItemUnavailable(format!(
                "request for {} #{index} failed",
                self.descriptor.record_type
            )));
        }
        self.items
            .get(index)
            .cloned()
            .ok_or_else(|| SourceError::ItemUnavailable(format!("no item at index {index}")))
    }
}
