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

//! Per-namespace in-flight caps. A message for a namespace at its cap is
//! simply held (never acknowledged) until a permit frees up; this applies
//! backpressure at the feed rather than the pool.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

pub struct NamespaceLimiter {
    default_permits: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl NamespaceLimiter {
    pub fn new(default_permits: u32) -> Self {
        Self { default_permits: default_permits.max(1) as usize, semaphores: Mutex::new(HashMap::new()) }
    }

    pub async fn acquire(&self, namespace: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut map = self.semaphores.lock().await;
            map.entry(namespace.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.default_permits)))
                .clone()
        };
        sem.acquire_owned().await.expect("namespace semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_namespaces_do_not_contend() {
        let limiter = NamespaceLimiter::new(1);
        let _a = limiter.acquire("ns-a").await;
        // A second namespace must not block on the first's single permit.
        let _b = tokio::time::timeout(std::time::Duration::from_millis(50), limiter.acquire("ns-b"))
            .await
            .expect("should not time out");
    }

    #[tokio::test]
    async fn same_namespace_blocks_past_the_cap() {
        let limiter = NamespaceLimiter::new(1);
        let _a = limiter.acquire("ns-a").await;
        let second = tokio::time::timeout(std::time::Duration::from_millis(30), limiter.acquire("ns-a")).await;
        assert!(second.is_err(), "second acquire should have blocked on the held permit");
    }
}
