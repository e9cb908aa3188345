//! In-memory sink used by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use modcrawl_shared::{ModCrawlError, Result};
use modcrawl_storage::{RowBatch, Scalar, Sink};

#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<(String, RowBatch)>>,
    queries: Mutex<Vec<String>>,
    query_result: Mutex<Vec<Vec<Scalar>>>,
    fail_appends: AtomicBool,
    failing_destinations: Mutex<Vec<String>>,
    append_delay: Mutex<Option<Duration>>,
}

impl MemorySink {
    pub fn set_query_result(&self, rows: Vec<Vec<Scalar>>) {
        *self.query_result.lock().unwrap() = rows;
    }

    pub fn fail_appends(&self) {
        self.fail_appends.store(true, Ordering::SeqCst);
    }

    /// Fail appends to `destination` only.
    pub fn fail_appends_to(&self, destination: &str) {
        self.failing_destinations
            .lock()
            .unwrap()
            .push(destination.to_string());
    }

    pub fn delay_appends(&self, delay: Duration) {
        *self.append_delay.lock().unwrap() = Some(delay);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn batches(&self, destination: &str) -> Vec<RowBatch> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

impl Sink for MemorySink {
    async fn append(&self, batch: &RowBatch, destination: &str) -> Result<()> {
        let delay = *self.append_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_destinations
            .lock()
            .unwrap()
            .iter()
            .any(|d| d == destination);
        if failing || self.fail_appends.load(Ordering::SeqCst) {
            return Err(ModCrawlError::Storage("disk full".into()));
        }
        self.batches
            .lock()
            .unwrap()
            .push((destination.to_string(), batch.clone()));
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Vec<Scalar>>> {
        self.queries.lock().unwrap().push(sql.to_string());
        Ok(self.query_result.lock().unwrap().clone())
    }
}
