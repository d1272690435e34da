//! Test infrastructure for the adapters.
//!
//! In-memory native clients for both backends, a connector that hands them
//! to the factory, and small fixtures shared by the integration tests.

#![allow(dead_code)]

pub mod document;
pub mod fixtures;
pub mod keyvalue;

pub use document::MockDocumentClient;
pub use fixtures::*;
pub use keyvalue::MockKeyValueClient;

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use unistore::NativeError;

/// Per-operation call counters and queued failures.
#[derive(Debug, Default)]
pub struct Faults {
    calls: Mutex<HashMap<String, u32>>,
    queued: Mutex<HashMap<String, VecDeque<NativeError>>>,
}

impl Faults {
    /// Counts a call to `operation` and pops the next queued failure for it.
    pub fn enter(&self, operation: &str) -> Result<(), NativeError> {
        *self.calls.lock().entry(operation.to_string()).or_default() += 1;
        match self
            .queued
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Queues `error` for the next `times` calls to `operation`.
    pub fn fail(&self, operation: &str, error: NativeError, times: usize) {
        let mut queued = self.queued.lock();
        let queue = queued.entry(operation.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Number of calls made to `operation`.
    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    /// Clears the call counters.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
