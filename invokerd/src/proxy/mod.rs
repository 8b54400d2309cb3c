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

//! One proxy per live container. The proxy owns its container record and
//! serialises all operations against it; callers hold it behind a
//! `tokio::sync::Mutex` (see [`crate::pool::table`]) which plays the role
//! of spec §5's "per-container mailbox".

pub mod error;
pub mod state;

pub use error::{classify_run_error, ProxyError, RunFailureReason};
pub use state::{ContainerRecord, ContainerState};

use crate::action::ActionKey;
use crate::driver::{CodeDescriptor, ContainerSpec, RunOutcome, SandboxDriver};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Whether a warm-hit-free assignment required an `/init` call (cold) or
/// reused an already-initialized container (warm).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Cold,
    Warm,
}

pub struct ContainerProxy {
    pub record: ContainerRecord,
    driver: Arc<dyn SandboxDriver>,
    assigned: Option<(ActionKey, u64)>,
    pause_failure_is_fatal: bool,
}

impl std::fmt::Debug for ContainerProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerProxy").field("record", &self.record).finish()
    }
}

impl ContainerProxy {
    #[tracing::instrument(skip(driver, spec), fields(kind = %spec.kind))]
    pub async fn create(
        driver: Arc<dyn SandboxDriver>,
        spec: &ContainerSpec,
        concurrent_limit: u32,
        pause_failure_is_fatal: bool,
    ) -> Result<Self, crate::driver::CreateError> {
        let handle = driver.create(spec).await?;
        let mut record = ContainerRecord::new(handle, spec.kind.clone(), spec.memory_mb);
        record.concurrent_limit = concurrent_limit.max(1);
        record.state = ContainerState::Prewarmed;
        info!(container = %record.id, kind = %record.kind, "container created");
        Ok(Self { record, driver, assigned: None, pause_failure_is_fatal })
    }

    pub fn is_idle(&self) -> bool {
        self.record.state.is_idle() && !self.record.unusable
    }

    pub fn matches_warm(&self, action: &ActionKey, revision: u64) -> bool {
        self.assigned.as_ref().map(|(a, r)| a == action && *r == revision).unwrap_or(false)
            && matches!(self.record.state, ContainerState::Initialized { .. })
    }

    /// Whether a second (or further) activation for `(action, revision)`
    /// can land on this container without a new `/init` call: it must
    /// already be running that action and have spare room under its
    /// `concurrent_limit` (spec §4.C step 2).
    pub fn has_capacity_for(&self, action: &ActionKey, revision: u64) -> bool {
        matches!(self.record.state, ContainerState::Running)
            && self.record.in_flight < self.record.concurrent_limit
            && self.assigned.as_ref().map(|(a, r)| a == action && *r == revision).unwrap_or(false)
    }

    /// Assigns an action to this container. Valid from `Prewarmed` (runs
    /// `/init`, a cold path) or from an `Initialized` match for the same
    /// `(action, revision)` (a warm path, no driver call).
    pub async fn assign(
        &mut self,
        action: &ActionKey,
        revision: u64,
        code: &CodeDescriptor,
    ) -> Result<AssignOutcome, ProxyError> {
        match &self.record.state {
            ContainerState::Prewarmed => {
                self.driver.init(&self.record.id, code).await?;
                self.record.state =
                    ContainerState::Initialized { action: action.clone(), revision };
                self.assigned = Some((action.clone(), revision));
                Ok(AssignOutcome::Cold)
            }
            ContainerState::Initialized { .. } if self.matches_warm(action, revision) => {
                Ok(AssignOutcome::Warm)
            }
            other => Err(ProxyError::WrongState(format!(
                "cannot assign action '{action}' from state {other:?}"
            ))),
        }
    }

    /// Brings a `Paused` container back to `Initialized` before any further
    /// `/run`. Resume failure is always fatal (spec §4.B).
    pub async fn resume(&mut self) -> Result<(), ProxyError> {
        if self.record.state != ContainerState::Paused {
            return Ok(());
        }
        match self.driver.resume(&self.record.id).await {
            Ok(()) => {
                let (action, revision) =
                    self.assigned.clone().expect("a Paused container was assigned before pausing");
                self.record.state = ContainerState::Initialized { action, revision };
                Ok(())
            }
            Err(e) => {
                self.mark_removing();
                Err(e.into())
            }
        }
    }

    /// Runs one activation. Allowed from `Initialized`, or from `Running`
    /// when the container's concurrent-activation limit allows another
    /// caller in.
    pub async fn run(
        &mut self,
        args: Value,
        deadline: Duration,
    ) -> Result<RunOutcome, ProxyError> {
        match &self.record.state {
            ContainerState::Initialized { .. } => {}
            ContainerState::Running if self.record.in_flight < self.record.concurrent_limit => {}
            other => {
                return Err(ProxyError::WrongState(format!("cannot run from state {other:?}")))
            }
        }
        self.record.state = ContainerState::Running;
        self.record.in_flight += 1;

        let result = self.driver.run(&self.record.id, args, deadline).await;

        self.record.in_flight -= 1;
        match result {
            Ok(outcome) => {
                if self.record.in_flight == 0 {
                    let (action, revision) = self
                        .assigned
                        .clone()
                        .expect("a Running container was assigned before running");
                    self.record.state = ContainerState::Initialized { action, revision };
                    self.record.last_used_at = Instant::now();
                }
                Ok(outcome)
            }
            Err(e) => {
                let reason = classify_run_error(&e);
                warn!(container = %self.record.id, ?reason, "run failed, removing container");
                self.mark_removing();
                Err(e.into())
            }
        }
    }

    /// Arms on entering `Initialized`; on fire the pool attempts a pause.
    /// Pause failure leaves the container `Initialized` and unpaused
    /// unless configured to treat that as fatal.
    pub async fn try_pause(&mut self) -> Result<(), ProxyError> {
        if !matches!(self.record.state, ContainerState::Initialized { .. }) {
            return Ok(());
        }
        match self.driver.pause(&self.record.id).await {
            Ok(()) => {
                self.record.state = ContainerState::Paused;
                Ok(())
            }
            Err(e) => {
                warn!(container = %self.record.id, error = %e, "pause failed");
                if self.pause_failure_is_fatal {
                    self.mark_removing();
                    Err(e.into())
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn mark_removing(&mut self) {
        if self.record.state != ContainerState::Gone {
            self.record.state = ContainerState::Removing;
            self.record.unusable = true;
        }
    }

    /// Idempotent and final. Always succeeds from the pool's perspective:
    /// the accountant is released by the caller exactly once regardless of
    /// whether the underlying driver call actually succeeded.
    pub async fn destroy(&mut self) {
        if self.record.state == ContainerState::Gone {
            return;
        }
        self.record.state = ContainerState::Removing;
        if let Err(e) = self.driver.destroy(&self.record.id).await {
            warn!(container = %self.record.id, error = %e, "destroy failed; memory is still released");
        }
        self.record.state = ContainerState::Gone;
        self.assigned = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ContainerKind;
    use crate::driver::mock::MockDriver;

    fn spec(kind: &str) -> ContainerSpec {
        ContainerSpec {
            name: "test".into(),
            kind: ContainerKind(kind.into()),
            memory_mb: 128,
            env: vec![],
            labels: vec![],
        }
    }

    fn code() -> CodeDescriptor {
        CodeDescriptor { code: "".into(), binary: false, main: "main".into(), env: vec![] }
    }

    #[tokio::test]
    async fn lifecycle_prewarm_to_initialized_to_running_and_back() {
        let driver = Arc::new(MockDriver::new());
        let mut proxy = ContainerProxy::create(driver, &spec("nodejs:18"), 1, false)
            .await
            .expect("create");
        assert_eq!(proxy.record.state, ContainerState::Prewarmed);

        let action = ActionKey { namespace: "ns".into(), name: "a".into() };
        let outcome = proxy.assign(&action, 1, &code()).await.expect("assign");
        assert_eq!(outcome, AssignOutcome::Cold);
        assert!(proxy.matches_warm(&action, 1));

        let _ = proxy.run(Value::Null, Duration::from_secs(1)).await.expect("run");
        assert!(matches!(proxy.record.state, ContainerState::Initialized { .. }));
        assert!(proxy.is_idle());
    }

    #[tokio::test]
    async fn run_failure_marks_removing_and_unusable() {
        let driver = Arc::new(MockDriver::new());
        driver.set_behavior("main", crate::driver::mock::Behavior::ConnectionDrop).await;
        let mut proxy = ContainerProxy::create(driver, &spec("nodejs:18"), 1, false)
            .await
            .expect("create");
        let action = ActionKey { namespace: "ns".into(), name: "a".into() };
        proxy.assign(&action, 1, &code()).await.expect("assign");

        let err = proxy.run(Value::Null, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProxyError::Run(_)));
        assert_eq!(proxy.record.state, ContainerState::Removing);
        assert!(proxy.record.unusable);
        assert!(!proxy.is_idle());
    }
}
