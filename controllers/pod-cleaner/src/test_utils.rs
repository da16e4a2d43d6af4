//! Test utilities for unit testing the controller
//!
//! Pod fixtures, a pre-synced cache and a handler that records every call.

use crate::error::ControllerError;
use crate::reconciler::ObjectHandler;
use async_trait::async_trait;
use informer::{Informer, Mirror, ObjectKey};
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::watcher::Event;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Helper to create a running, scheduled test Pod
pub fn create_test_pod(namespace: &str, name: &str, resource_version: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-1".to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// Helper to create a cache that has already listed `pods`
///
/// The informer is returned so further events can be applied.
pub fn synced_mirror(pods: Vec<Pod>) -> (Informer<Pod>, Mirror<Pod>) {
    let (mut informer, mirror, _notifications) = informer::informer::<Pod>();
    informer.apply(Event::Init);
    for pod in pods {
        informer.apply(Event::InitApply(pod));
    }
    informer.apply(Event::InitDone);
    (informer, mirror)
}

/// Polls `condition` until it holds, panicking after `timeout`
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Debug, Default)]
struct Recording {
    attempts: HashMap<ObjectKey, Vec<Instant>>,
    versions: HashMap<ObjectKey, Vec<Option<String>>>,
    absent: HashMap<ObjectKey, usize>,
    in_flight: HashMap<ObjectKey, usize>,
    max_in_flight: usize,
    completed: usize,
}

/// Handler that records every call, optionally failing or stalling
#[derive(Clone, Debug, Default)]
pub struct RecordingHandler {
    recording: Arc<Mutex<Recording>>,
    fail_times: u32,
    panic_times: u32,
    delay: Duration,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `times` attempts for every key
    pub fn failing(mut self, times: u32) -> Self {
        self.fail_times = times;
        self
    }

    /// Panics on the first `times` attempts for every key
    pub fn panicking(mut self, times: u32) -> Self {
        self.panic_times = times;
        self
    }

    /// Sleeps for `delay` inside every `on_present` call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn recording(&self) -> MutexGuard<'_, Recording> {
        self.recording.lock().unwrap()
    }

    pub fn present_calls(&self, key: &ObjectKey) -> usize {
        self.recording().attempts.get(key).map_or(0, Vec::len)
    }

    pub fn absent_calls(&self, key: &ObjectKey) -> usize {
        self.recording().absent.get(key).copied().unwrap_or(0)
    }

    pub fn attempt_times(&self, key: &ObjectKey) -> Vec<Instant> {
        self.recording().attempts.get(key).cloned().unwrap_or_default()
    }

    /// Resource versions seen by `on_present`, in call order
    pub fn seen_versions(&self, key: &ObjectKey) -> Vec<Option<String>> {
        self.recording().versions.get(key).cloned().unwrap_or_default()
    }

    pub fn total_present_calls(&self) -> usize {
        self.recording().attempts.values().map(Vec::len).sum()
    }

    /// Highest number of concurrent `on_present` calls seen for any one key
    pub fn max_in_flight(&self) -> usize {
        self.recording().max_in_flight
    }

    /// `on_present` calls that have returned
    pub fn completed(&self) -> usize {
        self.recording().completed
    }
}

#[async_trait]
impl ObjectHandler<Pod> for RecordingHandler {
    async fn on_present(&self, key: &ObjectKey, pod: &Pod) -> Result<(), ControllerError> {
        let attempt = {
            let mut recording = self.recording();
            let attempts = recording.attempts.entry(key.clone()).or_default();
            attempts.push(Instant::now());
            let attempt = attempts.len();
            recording
                .versions
                .entry(key.clone())
                .or_default()
                .push(pod.metadata.resource_version.clone());
            if attempt <= self.panic_times as usize {
                drop(recording);
                panic!("attempt {attempt} for {key} panicked");
            }
            let in_flight = recording.in_flight.entry(key.clone()).or_default();
            *in_flight += 1;
            let in_flight = *in_flight;
            recording.max_in_flight = recording.max_in_flight.max(in_flight);
            attempt
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        {
            let mut recording = self.recording();
            if let Some(in_flight) = recording.in_flight.get_mut(key) {
                *in_flight -= 1;
            }
            recording.completed += 1;
        }

        if attempt <= self.fail_times as usize {
            return Err(ControllerError::Reconciliation(format!(
                "attempt {attempt} for {key} failed"
            )));
        }
        Ok(())
    }

    async fn on_absent(&self, key: &ObjectKey) -> Result<(), ControllerError> {
        *self.recording().absent.entry(key.clone()).or_default() += 1;
        Ok(())
    }
}
