//! In-memory [`DataSource`] for tests.

use crate::document::RawDocument;
use crate::error::{AnalyticsError, Result};
use crate::upstream::DataSource;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type EventFn = Box<dyn Fn(&str) -> Result<u64> + Send + Sync>;

pub struct FakeSource {
    labels: Vec<Value>,
    exposure: Vec<Value>,
    events: EventFn,
    label_failure: Mutex<Option<AnalyticsError>>,
    label_calls: AtomicUsize,
    exposure_calls: AtomicUsize,
    event_searches: Mutex<Vec<String>>,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            exposure: Vec::new(),
            events: Box::new(|_| Ok(0)),
            label_failure: Mutex::new(None),
            label_calls: AtomicUsize::new(0),
            exposure_calls: AtomicUsize::new(0),
            event_searches: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSource {
    pub fn with_labels(labels: Vec<Value>) -> Self {
        Self {
            labels,
            ..Self::default()
        }
    }

    pub fn with_exposure(exposure: Vec<Value>) -> Self {
        Self {
            exposure,
            ..Self::default()
        }
    }

    pub fn events<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<u64> + Send + Sync + 'static,
    {
        self.events = Box::new(f);
        self
    }

    pub fn fail_labels_with(&self, err: AnalyticsError) {
        *self.label_failure.lock().unwrap() = Some(err);
    }

    pub fn label_calls(&self) -> usize {
        self.label_calls.load(Ordering::SeqCst)
    }

    pub fn exposure_calls(&self) -> usize {
        self.exposure_calls.load(Ordering::SeqCst)
    }

    pub fn event_searches(&self) -> Vec<String> {
        self.event_searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn fetch_labels(&self, _search: Option<&str>, limit: usize) -> Result<Vec<RawDocument>> {
        self.label_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.label_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .labels
            .iter()
            .take(limit)
            .cloned()
            .filter_map(RawDocument::from_value)
            .collect())
    }

    async fn fetch_exposure_rows(&self) -> Result<Vec<Value>> {
        self.exposure_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.exposure.clone())
    }

    async fn count_events(&self, search: &str) -> Result<u64> {
        self.event_searches.lock().unwrap().push(search.to_string());
        (self.events)(search)
    }
}
