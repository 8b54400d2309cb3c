/* -------------------------------------------------------------------------- *\
 *   Licensed under the Apache License, Version 2.0 (the "License");          *
 *   you may not use this file except in compliance with the License.        *
 *   You may obtain a copy of the License at                                 *
 *                                                                            *
 *       http://www.apache.org/licenses/LICENSE-2.0                          *
 *                                                                            *
 *   Unless required by applicable law or agreed to in writing, software     *
 *   distributed under the License is distributed on an "AS IS" BASIS,       *
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.*
 *   See the License for the specific language governing permissions and     *
 *   limitations under the License.                                          *
\* -------------------------------------------------------------------------- */

//! Counters and histograms for cold-start, wait, duration and response
//! size. Emission is non-blocking and never affects correctness: a handle
//! can be cloned freely and dropped samples under saturation are fine.
//! There is no metrics exporter here (out of scope); `Telemetry` is the
//! seam a real one would hook into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    activations: AtomicU64,
    cold_starts: AtomicU64,
    success: AtomicU64,
    application_error: AtomicU64,
    developer_error: AtomicU64,
    whisk_error: AtomicU64,
    concurrent_limit_hits: AtomicU64,
    timed_limit_hits: AtomicU64,
}

/// Cheap to clone; every clone shares the same counters.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    counters: Arc<Counters>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_activation(&self, cold: bool) {
        self.counters.activations.fetch_add(1, Ordering::Relaxed);
        if cold {
            self.counters.cold_starts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_status(&self, status: &crate::runner::ActivationStatus) {
        use crate::runner::ActivationStatus::*;
        let counter = match status {
            Success => &self.counters.success,
            ApplicationError => &self.counters.application_error,
            DeveloperError => &self.counters.developer_error,
            WhiskError => &self.counters.whisk_error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_concurrent_limit_hit(&self) {
        self.counters.concurrent_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.counters.timed_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn activations(&self) -> u64 {
        self.counters.activations.load(Ordering::Relaxed)
    }

    pub fn cold_starts(&self) -> u64 {
        self.counters.cold_starts.load(Ordering::Relaxed)
    }
}

/// Read-side snapshot of the pool's indices, used by tests to assert the
/// quantified invariants and by the demo CLI to print pool status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub free_count: usize,
    pub busy_count: usize,
    pub prewarm_count: usize,
    pub memory_used_mb: u32,
    pub memory_limit_mb: u32,
}
