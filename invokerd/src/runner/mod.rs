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

//! Drives the init/run protocol against one assigned container for one
//! work item, then writes the activation record and hands the container
//! back to the pool (spec §4.E).

pub mod error;

pub use error::RunnerError;

use crate::action::{ActionKey, ActionStore, ContainerKind};
use crate::config::PoolConfig;
use crate::driver::CodeDescriptor;
use crate::pool::{ContainerPool, PoolError};
use crate::proxy::{ContainerState, ProxyError};
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationStatus {
    Success,
    ApplicationError,
    DeveloperError,
    WhiskError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub truncated: bool,
    pub size: usize,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationLimits {
    pub memory_mb: u32,
    pub time_limit_s: u32,
    pub concurrent_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotations {
    pub kind: ContainerKind,
    pub limits: ActivationLimits,
    pub init_time_ms: Option<u64>,
    pub wait_time_ms: u64,
    pub cold: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub activation_id: Uuid,
    pub namespace: String,
    pub name: String,
    pub subject: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub status: ActivationStatus,
    pub response: ResponseInfo,
    pub logs_ref: Option<String>,
    pub annotations: Annotations,
}

/// One invocation message as handed off by the Work Feed.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub activation_id: Uuid,
    pub namespace: String,
    pub action_key: ActionKey,
    pub action_rev: Option<u64>,
    pub args: Value,
    pub transid: String,
    pub subject: String,
    pub queued_at: Instant,
    pub queue_deadline: Instant,
}

/// Write-only sink for completed activation records (result store).
#[async_trait]
pub trait ActivationSink: Send + Sync {
    async fn write(&self, record: &ActivationRecord) -> Result<(), RunnerError>;
}

/// Write-only sink for an activation's captured log lines.
#[async_trait]
pub trait LogForwarder: Send + Sync {
    async fn forward(
        &self,
        activation_id: Uuid,
        lines: Vec<crate::driver::LogLine>,
    ) -> Result<(), RunnerError>;
}

pub struct ActivationRunner {
    pool: Arc<ContainerPool>,
    action_store: Arc<dyn ActionStore>,
    sink: Arc<dyn ActivationSink>,
    log_forwarder: Arc<dyn LogForwarder>,
    telemetry: Telemetry,
    config: PoolConfig,
}

impl ActivationRunner {
    pub fn new(
        pool: Arc<ContainerPool>,
        action_store: Arc<dyn ActionStore>,
        sink: Arc<dyn ActivationSink>,
        log_forwarder: Arc<dyn LogForwarder>,
        telemetry: Telemetry,
        config: PoolConfig,
    ) -> Self {
        Self { pool, action_store, sink, log_forwarder, telemetry, config }
    }

    /// The crate's top-level operation: run one work item to completion and
    /// return its activation record. Returns [`crate::error::InvokerError`],
    /// the composed error type at the crate's public boundary; module-local
    /// error enums like [`RunnerError`] remain the internal vocabulary.
    #[tracing::instrument(skip(self, item), fields(activation_id = %item.activation_id))]
    pub async fn execute(&self, item: WorkItem) -> Result<ActivationRecord, crate::error::InvokerError> {
        self.execute_inner(item).await.map_err(crate::error::InvokerError::from)
    }

    async fn execute_inner(&self, item: WorkItem) -> Result<ActivationRecord, RunnerError> {
        if Instant::now() >= item.queue_deadline {
            return Err(RunnerError::SystemOverloaded);
        }

        let wait_time_ms = item.queued_at.elapsed().as_millis() as u64;
        let action = self
            .action_store
            .get_action(&item.action_key, item.action_rev)
            .await
            .map_err(|_| RunnerError::ActionNotFound)?;

        let mut attempts = 0u32;
        let assignment = loop {
            match self.pool.submit(&action).await {
                Ok(a) => break a,
                Err(PoolError::SystemOverloaded { .. }) | Err(PoolError::ShuttingDown) => {
                    return Err(RunnerError::SystemOverloaded)
                }
                Err(e @ PoolError::Create(_)) => {
                    attempts += 1;
                    if attempts > self.config.pre_execution_retries {
                        return Err(RunnerError::InitFailure(e.to_string()));
                    }
                    warn!(attempts, error = %e, "transient create failure, retrying against a fresh container");
                    continue;
                }
                Err(e) => return Err(RunnerError::Internal(e.to_string())),
            }
        };

        self.telemetry.record_activation(assignment.cold);
        let start_wall = chrono::Utc::now();
        let mut init_time_ms = None;

        let outcome = {
            let mut proxy = assignment.proxy.lock().await;

            if proxy.record.state == ContainerState::Paused {
                if let Err(e) = proxy.resume().await {
                    self.pool.return_to_pool(assignment.container.clone()).await;
                    return Err(RunnerError::Internal(format!("resume failed: {e}")));
                }
            }

            if assignment.cold {
                let init_start = Instant::now();
                let code = CodeDescriptor {
                    code: action.code_ref.clone(),
                    binary: false,
                    main: "main".into(),
                    env: Vec::new(),
                };
                if let Err(e) = proxy.assign(&action.key, action.revision, &code).await {
                    drop(proxy);
                    self.pool.return_to_pool(assignment.container.clone()).await;
                    return Err(RunnerError::InitFailure(e.to_string()));
                }
                init_time_ms = Some(init_start.elapsed().as_millis() as u64);
            }

            // A cold activation doesn't get the full time limit for /run
            // on top of whatever /init already spent (spec §4.B/§4.E.3),
            // and no activation gets more than what's left on the queue
            // deadline.
            let time_limit = Duration::from_secs(action.time_limit_s as u64);
            let consumed_by_init = Duration::from_millis(init_time_ms.unwrap_or(0));
            let run_budget = time_limit.saturating_sub(consumed_by_init);
            let remaining_on_queue_deadline = item.queue_deadline.saturating_duration_since(Instant::now());
            let deadline = run_budget.min(remaining_on_queue_deadline);

            proxy.run(item.args.clone(), deadline).await
        };

        // Pulled before `return_to_pool`: a fatal/timeout outcome destroys
        // the container, and a destroyed container's logs are gone.
        let log_lines = match self.pool.driver().logs(&assignment.container, Some(start_wall)).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(error = %e, "failed to fetch activation logs");
                Vec::new()
            }
        };

        self.pool.return_to_pool(assignment.container.clone()).await;

        let end_wall = chrono::Utc::now();
        let annotations = Annotations {
            kind: action.kind.clone(),
            limits: ActivationLimits {
                memory_mb: action.memory_mb,
                time_limit_s: action.time_limit_s,
                concurrent_limit: action.concurrent_limit,
            },
            init_time_ms,
            wait_time_ms,
            cold: assignment.cold,
        };

        let (status, response) = match outcome {
            Ok(run) => {
                let is_application_error = looks_like_application_error(&run.body);
                let status = if run.status_code == 200 && !is_application_error {
                    ActivationStatus::Success
                } else if run.status_code == 200 {
                    ActivationStatus::ApplicationError
                } else {
                    ActivationStatus::DeveloperError
                };
                (status, ResponseInfo { truncated: run.truncated, size: run.body.len(), body: run.body })
            }
            Err(ProxyError::Run(crate::driver::RunError::Timeout)) => {
                self.telemetry.record_timeout();
                (ActivationStatus::WhiskError, ResponseInfo { truncated: false, size: 0, body: String::new() })
            }
            Err(e) => {
                warn!(error = %e, "run failed");
                (ActivationStatus::WhiskError, ResponseInfo { truncated: false, size: 0, body: String::new() })
            }
        };
        self.telemetry.record_status(&status);

        let logs_ref = (!log_lines.is_empty()).then(|| format!("activation:{}", item.activation_id));

        let record = ActivationRecord {
            activation_id: item.activation_id,
            namespace: item.namespace,
            name: item.action_key.name.clone(),
            subject: item.subject,
            start_ms: start_wall.timestamp_millis(),
            end_ms: end_wall.timestamp_millis(),
            status,
            response,
            logs_ref,
            annotations,
        };

        if let Err(e) = self.sink.write(&record).await {
            warn!(error = %e, "failed to write activation record");
        }
        let _ = self.log_forwarder.forward(record.activation_id, log_lines).await;

        info!(status = ?record.status, cold = record.annotations.cold, "activation complete");
        Ok(record)
    }
}

fn looks_like_application_error(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").map(|_| true))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionDescriptor, ActionStoreError};
    use crate::config::PoolConfig;
    use crate::driver::mock::{Behavior, MockDriver};
    use std::time::Duration as StdDuration;

    struct StaticActionStore(ActionDescriptor);

    #[async_trait]
    impl ActionStore for StaticActionStore {
        async fn get_action(
            &self,
            _key: &ActionKey,
            _revision: Option<u64>,
        ) -> Result<ActionDescriptor, ActionStoreError> {
            Ok(self.0.clone())
        }
    }

    struct NullSink;

    #[async_trait]
    impl ActivationSink for NullSink {
        async fn write(&self, _record: &ActivationRecord) -> Result<(), RunnerError> {
            Ok(())
        }
    }

    #[async_trait]
    impl LogForwarder for NullSink {
        async fn forward(&self, _activation_id: Uuid, _lines: Vec<crate::driver::LogLine>) -> Result<(), RunnerError> {
            Ok(())
        }
    }

    fn work_item(key: ActionKey) -> WorkItem {
        let now = Instant::now();
        WorkItem {
            activation_id: Uuid::new_v4(),
            namespace: key.namespace.clone(),
            action_key: key,
            action_rev: Some(1),
            args: Value::Null,
            transid: "tid".into(),
            subject: "guest".into(),
            queued_at: now,
            queue_deadline: now + StdDuration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn application_error_keeps_container_warm_for_a_resubmission() {
        let driver = Arc::new(MockDriver::new());
        driver.set_behavior("main", Behavior::ApplicationError("boom".into())).await;

        let action = ActionDescriptor {
            key: ActionKey { namespace: "ns".into(), name: "a".into() },
            revision: 1,
            code_ref: "code".into(),
            kind: ContainerKind("nodejs:18".into()),
            memory_mb: 128,
            time_limit_s: 1,
            concurrent_limit: 1,
        };
        let pool = ContainerPool::new(driver, PoolConfig { memory_limit_mb: 256, ..Default::default() }, Telemetry::new());
        let runner = ActivationRunner::new(
            pool.clone(),
            Arc::new(StaticActionStore(action.clone())),
            Arc::new(NullSink),
            Arc::new(NullSink),
            Telemetry::new(),
            PoolConfig::default(),
        );

        let record = runner.execute(work_item(action.key.clone())).await.expect("execute");
        assert_eq!(record.status, ActivationStatus::ApplicationError);

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.busy_count, 0);
        assert_eq!(snapshot.free_count, 1);

        let second = runner.execute(work_item(action.key.clone())).await.expect("execute again");
        assert!(!second.annotations.cold);
    }

    #[tokio::test]
    async fn timeout_destroys_the_container() {
        let driver = Arc::new(MockDriver::new());
        driver
            .set_behavior(
                "main",
                Behavior::Sleep(StdDuration::from_millis(200), Box::new(Behavior::Success(Value::Null))),
            )
            .await;

        let action = ActionDescriptor {
            key: ActionKey { namespace: "ns".into(), name: "a".into() },
            revision: 1,
            code_ref: "code".into(),
            kind: ContainerKind("nodejs:18".into()),
            memory_mb: 128,
            time_limit_s: 0,
            concurrent_limit: 1,
        };
        let pool = ContainerPool::new(driver, PoolConfig { memory_limit_mb: 256, ..Default::default() }, Telemetry::new());
        let runner = ActivationRunner::new(
            pool.clone(),
            Arc::new(StaticActionStore(action.clone())),
            Arc::new(NullSink),
            Arc::new(NullSink),
            Telemetry::new(),
            PoolConfig::default(),
        );

        let record = runner.execute(work_item(action.key.clone())).await.expect("execute");
        assert_eq!(record.status, ActivationStatus::WhiskError);

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot.memory_used_mb, 0);
    }
}
