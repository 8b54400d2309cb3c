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

//! Admission, selection, eviction and prewarm management: the busiest
//! component in the pool (spec §4.C). `ContainerPool` serialises its own
//! decision step behind one `tokio::sync::Mutex` over [`table::PoolTable`];
//! the actual Create/Init/Run driver calls happen with that lock dropped.

pub mod error;
pub mod table;

pub use error::PoolError;
pub use table::{FreeEntry, PoolTable};

use crate::action::{ActionDescriptor, ContainerKind};
use crate::config::PoolConfig;
use crate::driver::{ContainerHandle, ContainerSpec, SandboxDriver};
use crate::proxy::{ContainerProxy, ContainerState};
use crate::telemetry::{PoolSnapshot, Telemetry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A container handed to the runner for one work item, plus whether
/// obtaining it required a cold path (init, or a brand new container).
pub struct Assignment {
    pub container: ContainerHandle,
    pub proxy: Arc<Mutex<ContainerProxy>>,
    pub cold: bool,
}

pub struct ContainerPool {
    table: Mutex<PoolTable>,
    driver: Arc<dyn SandboxDriver>,
    config: PoolConfig,
    telemetry: Telemetry,
    shutting_down: AtomicBool,
}

impl ContainerPool {
    pub fn new(driver: Arc<dyn SandboxDriver>, config: PoolConfig, telemetry: Telemetry) -> Arc<Self> {
        let table = Mutex::new(PoolTable::new(config.memory_limit_mb));
        let pool = Arc::new(Self { table, driver, config, telemetry, shutting_down: AtomicBool::new(false) });
        pool.clone().spawn_sweeper();
        pool
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// The sandbox driver backing this pool, so the runner can pull an
    /// activation's captured log lines (spec §4.A `logs`) without the pool
    /// needing to know anything about log forwarding itself.
    pub fn driver(&self) -> Arc<dyn SandboxDriver> {
        self.driver.clone()
    }

    #[tracing::instrument(skip(self, action), fields(action = %action.key, revision = action.revision))]
    pub async fn submit(&self, action: &ActionDescriptor) -> Result<Assignment, PoolError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        if action.memory_mb > self.config.memory_limit_mb {
            return Err(PoolError::SystemOverloaded { shortfall_mb: action.memory_mb });
        }

        if let Some(assignment) = self.try_claim_warm(action).await {
            self.maybe_refill_prewarm(&action.kind).await;
            return Ok(assignment);
        }

        if let Some(assignment) = self.try_claim_busy_slot(action).await {
            self.telemetry.record_concurrent_limit_hit();
            return Ok(assignment);
        }

        if let Some(assignment) = self.try_claim_prewarm(action).await {
            self.maybe_refill_prewarm(&action.kind).await;
            return Ok(assignment);
        }

        let assignment = self.create_for(action).await?;
        self.maybe_refill_prewarm(&action.kind).await;
        Ok(assignment)
    }

    /// Step 1 of the selection algorithm: exact `(kind, action, revision)`
    /// match among idle containers.
    async fn try_claim_warm(&self, action: &ActionDescriptor) -> Option<Assignment> {
        let mut table = self.table.lock().await;
        let idx = table.find_warm_hit(&action.kind, &action.key, action.revision)?;
        let entry = table.free.remove(idx);
        let proxy = table.containers.get(&entry.id)?.clone();
        let _ = table.busy.insert(entry.id.clone(), (entry.kind.clone(), entry.memory_mb));
        info!(container = %entry.id, "claimed warm container");
        Some(Assignment { container: entry.id, proxy, cold: false })
    }

    /// Step 2 of the selection algorithm: a container already serving this
    /// `(kind, action, revision)` with spare room under its
    /// `concurrent_limit`. Unlike steps 1/3/4 this container stays in
    /// `busy` throughout; it was never idle.
    async fn try_claim_busy_slot(&self, action: &ActionDescriptor) -> Option<Assignment> {
        let candidates: Vec<(ContainerHandle, Arc<Mutex<ContainerProxy>>)> = {
            let table = self.table.lock().await;
            table
                .busy
                .iter()
                .filter(|(_, (kind, _))| kind == &action.kind)
                .filter_map(|(handle, _)| table.containers.get(handle).map(|p| (handle.clone(), p.clone())))
                .collect()
        };
        for (handle, proxy_arc) in candidates {
            let proxy = proxy_arc.lock().await;
            if proxy.has_capacity_for(&action.key, action.revision) {
                info!(container = %handle, "reused busy container under concurrent limit");
                drop(proxy);
                return Some(Assignment { container: handle, proxy: proxy_arc, cold: false });
            }
        }
        None
    }

    /// Step 3 of the selection algorithm: any prewarmed container of
    /// matching kind (still needs `/init`, so this is a partial cold path).
    async fn try_claim_prewarm(&self, action: &ActionDescriptor) -> Option<Assignment> {
        let mut table = self.table.lock().await;
        let idx = table.find_prewarm_hit(&action.kind)?;
        let entry = table.free.remove(idx);
        let proxy = table.containers.get(&entry.id)?.clone();
        let _ = table.busy.insert(entry.id.clone(), (entry.kind.clone(), entry.memory_mb));
        info!(container = %entry.id, "claimed prewarmed container");
        Some(Assignment { container: entry.id, proxy, cold: true })
    }

    /// Step 3: reserve budget (evicting idle containers if short), then
    /// create a fresh container outside the pool's lock.
    async fn create_for(&self, action: &ActionDescriptor) -> Result<Assignment, PoolError> {
        let shortfall = {
            let mut table = self.table.lock().await;
            table.accountant.try_reserve(action.memory_mb)
        };

        if shortfall > 0 {
            self.evict_to_cover(shortfall).await?;
            let shortfall = {
                let mut table = self.table.lock().await;
                table.accountant.try_reserve(action.memory_mb)
            };
            if shortfall > 0 {
                return Err(PoolError::SystemOverloaded { shortfall_mb: shortfall });
            }
        }

        let spec = ContainerSpec {
            name: format!("{}-{}", action.key, uuid::Uuid::new_v4()),
            kind: action.kind.clone(),
            memory_mb: action.memory_mb,
            env: Vec::new(),
            labels: Vec::new(),
        };

        match ContainerProxy::create(
            self.driver.clone(),
            &spec,
            action.concurrent_limit,
            self.config.pause_failure_is_fatal,
        )
        .await
        {
            Ok(proxy) => {
                let handle = proxy.record.id.clone();
                let mut table = self.table.lock().await;
                let proxy_arc = Arc::new(Mutex::new(proxy));
                let _ = table.containers.insert(handle.clone(), proxy_arc.clone());
                let _ = table.busy.insert(handle.clone(), (action.kind.clone(), action.memory_mb));
                Ok(Assignment { container: handle, proxy: proxy_arc, cold: true })
            }
            Err(e) => {
                let mut table = self.table.lock().await;
                let _ = table.accountant.release(action.memory_mb);
                Err(e.into())
            }
        }
    }

    /// Evicts idle containers, in LRU/FIFO order per config, until at
    /// least `need_mb` has been reclaimed. Leaves the accountant reflecting
    /// the reclaimed memory; the caller re-attempts `try_reserve`.
    async fn evict_to_cover(&self, need_mb: u32) -> Result<(), PoolError> {
        let handles = {
            let mut table = self.table.lock().await;
            let Some(handles) = table.pick_eviction_candidates(need_mb, self.config.eviction_lru) else {
                return Err(PoolError::SystemOverloaded { shortfall_mb: need_mb });
            };
            for handle in &handles {
                let _ = table.remove_from_free(handle);
            }
            handles
        };

        for handle in handles {
            let proxy_arc = {
                let table = self.table.lock().await;
                table.containers.get(&handle).cloned()
            };
            let Some(proxy_arc) = proxy_arc else { continue };
            let mut proxy = proxy_arc.lock().await;
            proxy.destroy().await;
            let memory_mb = proxy.record.memory_mb;
            drop(proxy);

            let mut table = self.table.lock().await;
            let _ = table.containers.remove(&handle);
            if let Err(e) = table.accountant.release(memory_mb) {
                tracing::error!(error = %e, "accountant underflow during eviction");
                std::process::exit(4);
            }
            info!(container = %handle, "evicted idle container for admission");
        }
        Ok(())
    }

    /// Called by the runner once an activation finishes. Returns the
    /// container to `free` if it is still idle and usable, otherwise
    /// destroys it and releases its memory.
    pub async fn return_to_pool(&self, handle: ContainerHandle) {
        let proxy_arc = {
            let table = self.table.lock().await;
            table.containers.get(&handle).cloned()
        };
        let Some(proxy_arc) = proxy_arc else { return };
        let mut proxy = proxy_arc.lock().await;

        if proxy.is_idle() {
            let warm_for = proxy.record.state.initialized_for().map(|(a, r)| (a.clone(), r));
            let entry = FreeEntry {
                id: handle.clone(),
                kind: proxy.record.kind.clone(),
                memory_mb: proxy.record.memory_mb,
                warm_for,
                last_used_at: proxy.record.last_used_at,
                created_at: proxy.record.created_at,
            };
            drop(proxy);
            let mut table = self.table.lock().await;
            let _ = table.busy.remove(&handle);
            table.free.push(entry);
        } else {
            proxy.destroy().await;
            let memory_mb = proxy.record.memory_mb;
            drop(proxy);
            let mut table = self.table.lock().await;
            let _ = table.busy.remove(&handle);
            let _ = table.containers.remove(&handle);
            if let Err(e) = table.accountant.release(memory_mb) {
                tracing::error!(error = %e, "accountant underflow on teardown");
                std::process::exit(4);
            }
        }
    }

    async fn maybe_refill_prewarm(&self, kind: &ContainerKind) {
        let Some(cfg) = self.config.prewarm.iter().find(|c| &c.kind == kind).cloned() else {
            return;
        };
        let deficit = {
            let table = self.table.lock().await;
            cfg.count.saturating_sub(table.prewarm_count(kind))
        };
        for _ in 0..deficit {
            let shortfall = {
                let mut table = self.table.lock().await;
                table.accountant.try_reserve(cfg.memory_mb)
            };
            if shortfall > 0 {
                // No spare budget right now; refill again on the next
                // opportunity rather than competing with real work.
                break;
            }

            let spec = ContainerSpec {
                name: format!("prewarm-{}-{}", kind, uuid::Uuid::new_v4()),
                kind: kind.clone(),
                memory_mb: cfg.memory_mb,
                env: Vec::new(),
                labels: Vec::new(),
            };
            match ContainerProxy::create(self.driver.clone(), &spec, 1, self.config.pause_failure_is_fatal).await {
                Ok(proxy) => {
                    let handle = proxy.record.id.clone();
                    let entry = FreeEntry {
                        id: handle.clone(),
                        kind: kind.clone(),
                        memory_mb: cfg.memory_mb,
                        warm_for: None,
                        last_used_at: proxy.record.last_used_at,
                        created_at: proxy.record.created_at,
                    };
                    let mut table = self.table.lock().await;
                    let _ = table.containers.insert(handle, Arc::new(Mutex::new(proxy)));
                    table.free.push(entry);
                }
                Err(e) => {
                    warn!(error = %e, "prewarm create failed");
                    let mut table = self.table.lock().await;
                    let _ = table.accountant.release(cfg.memory_mb);
                }
            }
        }
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let table = self.table.lock().await;
        let prewarm_count = table.free.iter().filter(|e| e.warm_for.is_none()).count();
        PoolSnapshot {
            free_count: table.free.len(),
            busy_count: table.busy.len(),
            prewarm_count,
            memory_used_mb: table.accountant.memory_used_mb(),
            memory_limit_mb: table.accountant.memory_limit_mb(),
        }
    }

    /// Stops accepting new work, waits for in-flight activations to drain
    /// up to `grace`, then force-destroys whatever is left (spec §8,
    /// "Drain law": `memory_used_mb == 0` and no container in any index).
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        info!("pool shutdown: draining in-flight activations");

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let busy_empty = self.table.lock().await.busy.is_empty();
            if busy_empty || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let handles: Vec<ContainerHandle> = {
            let table = self.table.lock().await;
            table.containers.keys().cloned().collect()
        };
        if !handles.is_empty() {
            warn!(count = handles.len(), "force-destroying remaining containers on shutdown");
        }
        for handle in handles {
            let proxy_arc = {
                let table = self.table.lock().await;
                table.containers.get(&handle).cloned()
            };
            let Some(proxy_arc) = proxy_arc else { continue };
            let mut proxy = proxy_arc.lock().await;
            if proxy.record.state != ContainerState::Gone {
                proxy.destroy().await;
            }
            let memory_mb = proxy.record.memory_mb;
            drop(proxy);

            let mut table = self.table.lock().await;
            let _ = table.containers.remove(&handle);
            table.free.retain(|e| e.id != handle);
            let _ = table.busy.remove(&handle);
            let _ = table.accountant.release(memory_mb);
        }
        info!("pool shutdown complete");
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let period = Duration::from_millis((self.config.idle_grace_ms / 4).max(50));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if self.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                self.sweep_idle_grace().await;
                self.sweep_prewarm_max_age().await;
            }
        });
    }

    async fn sweep_idle_grace(&self) {
        let idle_grace = Duration::from_millis(self.config.idle_grace_ms);
        let candidates: Vec<ContainerHandle> = {
            let table = self.table.lock().await;
            table
                .free
                .iter()
                .filter(|e| e.warm_for.is_some() && e.last_used_at.elapsed() >= idle_grace)
                .map(|e| e.id.clone())
                .collect()
        };
        for handle in candidates {
            let proxy_arc = {
                let table = self.table.lock().await;
                table.containers.get(&handle).cloned()
            };
            let Some(proxy_arc) = proxy_arc else { continue };
            let mut proxy = proxy_arc.lock().await;
            if matches!(proxy.record.state, ContainerState::Initialized { .. }) {
                let _ = proxy.try_pause().await;
            }
        }
    }

    async fn sweep_prewarm_max_age(&self) {
        let expired: Vec<(ContainerHandle, ContainerKind)> = {
            let table = self.table.lock().await;
            table
                .free
                .iter()
                .filter(|e| e.warm_for.is_none())
                .filter_map(|e| {
                    let cfg = self.config.prewarm.iter().find(|c| c.kind == e.kind)?;
                    if e.created_at.elapsed() >= Duration::from_secs(cfg.max_age_s) {
                        Some((e.id.clone(), e.kind.clone()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (handle, kind) in expired {
            let proxy_arc = {
                let mut table = self.table.lock().await;
                let _ = table.remove_from_free(&handle);
                table.containers.remove(&handle)
            };
            if let Some(proxy_arc) = proxy_arc {
                let mut proxy = proxy_arc.lock().await;
                proxy.destroy().await;
                let memory_mb = proxy.record.memory_mb;
                drop(proxy);
                let mut table = self.table.lock().await;
                let _ = table.accountant.release(memory_mb);
                info!(container = %handle, "replaced prewarm container past max age");
            }
            self.maybe_refill_prewarm(&kind).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKey;
    use crate::driver::mock::MockDriver;

    fn action(namespace: &str, name: &str, memory_mb: u32) -> ActionDescriptor {
        action_of_kind(namespace, name, memory_mb, "nodejs:18")
    }

    fn action_of_kind(namespace: &str, name: &str, memory_mb: u32, kind: &str) -> ActionDescriptor {
        action_with_concurrent_limit(namespace, name, memory_mb, kind, 1)
    }

    fn action_with_concurrent_limit(
        namespace: &str,
        name: &str,
        memory_mb: u32,
        kind: &str,
        concurrent_limit: u32,
    ) -> ActionDescriptor {
        ActionDescriptor {
            key: ActionKey { namespace: namespace.into(), name: name.into() },
            revision: 1,
            code_ref: "code".into(),
            kind: ContainerKind(kind.into()),
            memory_mb,
            time_limit_s: 1,
            concurrent_limit,
        }
    }

    #[tokio::test]
    async fn warm_hit_reuses_the_same_container() {
        let driver = Arc::new(MockDriver::new());
        let pool = ContainerPool::new(driver, PoolConfig { memory_limit_mb: 512, ..Default::default() }, Telemetry::new());

        let a = action("ns", "a", 256);
        let first = pool.submit(&a).await.expect("first submit");
        assert!(first.cold);
        let first_id = first.container.clone();
        {
            let mut proxy = first.proxy.lock().await;
            let _ = proxy
                .assign(&a.key, a.revision, &crate::driver::CodeDescriptor {
                    code: "".into(),
                    binary: false,
                    main: "main".into(),
                    env: vec![],
                })
                .await;
        }
        pool.return_to_pool(first_id.clone()).await;

        let second = pool.submit(&a).await.expect("second submit");
        assert!(!second.cold);
        assert_eq!(second.container, first_id);
    }

    #[tokio::test]
    async fn overload_without_reclaimable_memory_is_rejected() {
        let driver = Arc::new(MockDriver::new());
        let pool = ContainerPool::new(driver, PoolConfig { memory_limit_mb: 256, ..Default::default() }, Telemetry::new());

        let a = action("ns", "a", 256);
        let first = pool.submit(&a).await.expect("first submit");
        assert_eq!(pool.snapshot().await.memory_used_mb, 256);

        let second = pool.submit(&a).await;
        assert!(matches!(second, Err(PoolError::SystemOverloaded { .. })));

        // sanity: no second container was created
        let _ = first;
        assert_eq!(pool.snapshot().await.busy_count, 1);
    }

    #[tokio::test]
    async fn eviction_under_pressure_reclaims_from_the_idle_set() {
        let driver = Arc::new(MockDriver::new());
        let pool = ContainerPool::new(driver, PoolConfig { memory_limit_mb: 512, ..Default::default() }, Telemetry::new());

        let a = action_of_kind("ns", "a", 256, "nodejs:18");
        let b = action_of_kind("ns", "b", 256, "nodejs:18");
        let c = action_of_kind("ns", "c", 384, "python:3.11");

        let first = pool.submit(&a).await.expect("submit a");
        pool.return_to_pool(first.container).await;
        let second = pool.submit(&b).await.expect("submit b");
        pool.return_to_pool(second.container).await;
        assert_eq!(pool.snapshot().await.memory_used_mb, 512);

        let third = pool.submit(&c).await.expect("submit c, evicting a and/or b");
        assert!(third.cold);

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.memory_used_mb, 384);
        assert_eq!(snapshot.busy_count, 1);
        assert_eq!(snapshot.free_count, 0);
    }

    #[tokio::test]
    async fn concurrent_limit_allows_a_second_activation_on_a_busy_container() {
        let driver = Arc::new(MockDriver::new());
        let pool = ContainerPool::new(driver, PoolConfig { memory_limit_mb: 256, ..Default::default() }, Telemetry::new());

        let a = action_with_concurrent_limit("ns", "a", 128, "nodejs:18", 2);
        let first = pool.submit(&a).await.expect("submit a");
        assert!(first.cold);
        {
            let mut proxy = first.proxy.lock().await;
            proxy
                .assign(&a.key, a.revision, &crate::driver::CodeDescriptor {
                    code: "".into(),
                    binary: false,
                    main: "main".into(),
                    env: vec![],
                })
                .await
                .expect("assign");
            // A real `run()` holds this state for the duration of the
            // driver call; poke it directly to simulate an activation
            // still in flight when the second submission arrives.
            proxy.record.state = ContainerState::Running;
            proxy.record.in_flight = 1;
        }

        let second = pool.submit(&a).await.expect("submit a again while first is in flight");
        assert!(!second.cold);
        assert_eq!(second.container, first.container);
    }

    #[tokio::test]
    async fn shutdown_drains_to_zero_memory() {
        let driver = Arc::new(MockDriver::new());
        let pool = ContainerPool::new(driver, PoolConfig { memory_limit_mb: 512, ..Default::default() }, Telemetry::new());

        let a = action("ns", "a", 256);
        let assignment = pool.submit(&a).await.expect("submit");
        pool.return_to_pool(assignment.container).await;

        pool.shutdown(Duration::from_millis(200)).await;
        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.memory_used_mb, 0);
        assert_eq!(snapshot.free_count, 0);
        assert_eq!(snapshot.busy_count, 0);
    }
}
