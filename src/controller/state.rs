//! Pass bookkeeping
//!
//! Every status write bumps the record's resourceVersion and wakes the
//! watcher again. The tracker remembers when each record last finished a
//! pass so those echoes can be requeued instead of reconciled.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct PassRecord {
    generation: i64,
    finished_at: Instant,
    failed: bool,
}

/// Thread-safe record of finished passes, keyed by `namespace/name`.
#[derive(Clone, Default)]
pub struct PassTracker {
    inner: Arc<RwLock<HashMap<String, PassRecord>>>,
}

impl PassTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a finished pass over `generation`.
    pub fn finish(&self, key: &str, generation: i64, failed: bool) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.insert(
            key.to_string(),
            PassRecord {
                generation,
                finished_at: Instant::now(),
                failed,
            },
        );
    }

    pub fn forget(&self, key: &str) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.remove(key);
    }

    /// Time left before `generation` is due again, or `None` when it should
    /// be reconciled now.
    ///
    /// A new generation is always due. Otherwise the last pass holds the
    /// record off for `interval`, or `error_interval` when it failed.
    pub fn remaining(
        &self,
        key: &str,
        generation: i64,
        interval: Duration,
        error_interval: Duration,
    ) -> Option<Duration> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let record = state.get(key)?;
        if record.generation != generation {
            return None;
        }
        let window = if record.failed { error_interval } else { interval };
        window
            .checked_sub(record.finished_at.elapsed())
            .filter(|left| !left.is_zero())
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracker key for a record.
pub fn pass_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
