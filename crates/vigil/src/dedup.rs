//! Correlation-key deduplication and in-flight tracking.
//!
//! Repeated warning events for the same failing workload arrive in bursts;
//! the table admits the first signal per correlation key and suppresses the
//! rest while a pipeline is in flight and for one suppression window after it
//! completes. Expired entries are reaped on access, so the table stays
//! bounded by the set of recently-failing workloads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug)]
enum EntryState {
    /// A pipeline for this key is currently executing.
    InFlight,
    /// The pipeline completed; suppress until the deadline, then re-arm.
    Cooling { until: Instant },
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    duplicates: u64,
}

type Table = Arc<Mutex<HashMap<String, Entry>>>;

/// Outcome of offering an incident to the table.
pub enum Admission {
    /// First signal for this key: run the pipeline. Dropping the guard (or
    /// calling [`PipelineGuard::complete`]) starts the suppression window.
    Admitted(PipelineGuard),
    /// Duplicate within the window or while in flight.
    Suppressed {
        /// Duplicates recorded for this key so far, including this one.
        duplicates: u64,
    },
}

/// Shared dedup/in-flight table keyed by correlation key.
///
/// This is the pipeline's only shared mutable state; all mutation goes
/// through the internal mutex.
#[derive(Clone)]
pub struct DedupTable {
    window: Duration,
    inner: Table,
    suppressed: Arc<AtomicU64>,
}

impl DedupTable {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Arc::new(Mutex::new(HashMap::new())),
            suppressed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offer an incident key to the table.
    pub fn admit(&self, key: &str) -> Admission {
        let now = Instant::now();
        let mut table = self.inner.lock().expect("dedup table poisoned");

        // Reap entries whose suppression window has passed.
        table.retain(|_, entry| match entry.state {
            EntryState::InFlight => true,
            EntryState::Cooling { until } => until > now,
        });

        if let Some(entry) = table.get_mut(key) {
            entry.duplicates += 1;
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_key = %key,
                duplicates = entry.duplicates,
                "Suppressing duplicate incident"
            );
            return Admission::Suppressed {
                duplicates: entry.duplicates,
            };
        }

        table.insert(
            key.to_string(),
            Entry {
                state: EntryState::InFlight,
                duplicates: 0,
            },
        );

        Admission::Admitted(PipelineGuard {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            window: self.window,
            released: false,
        })
    }

    /// Total incidents suppressed as duplicates since startup.
    pub fn suppressed_total(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

/// Marks one in-flight pipeline execution. On release the key transitions to
/// its suppression window, after which it re-arms.
pub struct PipelineGuard {
    inner: Table,
    key: String,
    window: Duration,
    released: bool,
}

impl PipelineGuard {
    /// Explicitly finish the pipeline and start the suppression window.
    pub fn complete(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut table = self.inner.lock().expect("dedup table poisoned");
        if let Some(entry) = table.get_mut(&self.key) {
            entry.state = EntryState::Cooling {
                until: Instant::now() + self.window,
            };
        }
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        self.release();
    }
}
