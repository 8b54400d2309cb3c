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

//! An in-memory [`SandboxDriver`] with no real container runtime behind it.
//! Used by the demo CLI and the pool's own test suite to exercise every
//! state transition without a Docker/Kubernetes daemon on hand.

use super::{
    CodeDescriptor, ContainerHandle, ContainerSpec, CreateError, DriverError, InitError, LogLine,
    LogStream, RunError, RunOutcome, SandboxDriver,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted response for a given `main` entry point, set by tests before a
/// container is asked to run it.
#[derive(Debug, Clone)]
pub enum Behavior {
    Success(Value),
    ApplicationError(String),
    DeveloperError(u16),
    /// Sleeps for the given duration before responding; lets tests exercise
    /// `RunError::Timeout` by sleeping past the deadline passed to `run`.
    Sleep(Duration, Box<Behavior>),
    ConnectionDrop,
}

#[derive(Debug)]
struct MockContainer {
    #[allow(dead_code)]
    spec: ContainerSpec,
    initialized_main: Option<String>,
    log_lines: Vec<LogLine>,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<ContainerHandle, MockContainer>,
    behaviors: HashMap<String, Behavior>,
    fail_create: bool,
    fail_init: bool,
}

/// Cheap to clone; all instances share the same backing state.
#[derive(Clone, Debug, Default)]
pub struct MockDriver {
    state: Arc<Mutex<State>>,
    next_id: Arc<AtomicU64>,
}

/// Failure mode for constructing a driver, distinct from any per-container
/// `CreateError`: this is the process-level "the sandbox runtime itself is
/// unavailable" failure (spec §6 exit code 3).
#[derive(Debug, thiserror::Error)]
pub enum DriverInitError {
    #[error("sandbox driver is unavailable")]
    Unavailable,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fallible constructor used by the demo CLI to exercise exit code 3;
    /// a real driver would fail here on e.g. an unreachable container
    /// runtime daemon.
    pub fn try_new(simulate_failure: bool) -> Result<Self, DriverInitError> {
        if simulate_failure {
            Err(DriverInitError::Unavailable)
        } else {
            Ok(Self::default())
        }
    }

    pub async fn set_behavior(&self, main: impl Into<String>, behavior: Behavior) {
        self.state.lock().await.behaviors.insert(main.into(), behavior);
    }

    /// Makes the next `create` call (and every subsequent one, until
    /// cleared) fail with `CreateError::Rejected`.
    pub async fn set_fail_create(&self, fail: bool) {
        self.state.lock().await.fail_create = fail;
    }

    pub async fn set_fail_init(&self, fail: bool) {
        self.state.lock().await.fail_init = fail;
    }

    pub async fn live_container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }
}

#[async_trait]
impl SandboxDriver for MockDriver {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, CreateError> {
        let mut state = self.state.lock().await;
        if state.fail_create {
            return Err(CreateError::Rejected("mock driver configured to fail create".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = ContainerHandle(format!("mock-{id}"));
        let _ = state.containers.insert(
            handle.clone(),
            MockContainer { spec: spec.clone(), initialized_main: None, log_lines: Vec::new() },
        );
        Ok(handle)
    }

    async fn init(
        &self,
        handle: &ContainerHandle,
        code: &CodeDescriptor,
    ) -> Result<(), InitError> {
        let mut state = self.state.lock().await;
        if state.fail_init {
            return Err(InitError::BadStatus {
                status: 500,
                diagnostic: "mock driver configured to fail init".into(),
            });
        }
        let main = code.main.clone();
        match state.containers.get_mut(handle) {
            Some(c) => {
                c.initialized_main = Some(main);
                Ok(())
            }
            None => Err(InitError::BadStatus {
                status: 404,
                diagnostic: format!("no such container {handle}"),
            }),
        }
    }

    async fn run(
        &self,
        handle: &ContainerHandle,
        _args: Value,
        deadline: Duration,
    ) -> Result<RunOutcome, RunError> {
        let main = {
            let state = self.state.lock().await;
            let container = state
                .containers
                .get(handle)
                .ok_or_else(|| RunError::Connection(format!("no such container {handle}")))?;
            container
                .initialized_main
                .clone()
                .ok_or_else(|| RunError::Connection("container was never initialized".into()))?
        };

        let behavior = {
            let state = self.state.lock().await;
            state.behaviors.get(&main).cloned().unwrap_or(Behavior::Success(Value::Null))
        };

        let outcome = resolve_behavior(behavior, deadline).await;

        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.get_mut(handle) {
            let text = match &outcome {
                Ok(run) => format!("run completed with status {}", run.status_code),
                Err(e) => format!("run failed: {e}"),
            };
            container.log_lines.push(LogLine { time: Utc::now(), stream: LogStream::Stdout, text });
        }
        drop(state);

        outcome
    }

    async fn pause(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
        let state = self.state.lock().await;
        if state.containers.contains_key(handle) {
            Ok(())
        } else {
            Err(DriverError::Call { handle: handle.clone(), reason: "no such container".into() })
        }
    }

    async fn resume(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
        self.pause(handle).await
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        let _ = state.containers.remove(handle);
        Ok(())
    }

    async fn logs(
        &self,
        handle: &ContainerHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogLine>, DriverError> {
        let state = self.state.lock().await;
        let Some(container) = state.containers.get(handle) else {
            return Ok(Vec::new());
        };
        let lines = container
            .log_lines
            .iter()
            .filter(|l| since.map(|cutoff| l.time >= cutoff).unwrap_or(true))
            .cloned()
            .collect();
        Ok(lines)
    }
}

fn resolve_behavior(
    behavior: Behavior,
    deadline: Duration,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<RunOutcome, RunError>> + Send>> {
    Box::pin(async move {
        match behavior {
            Behavior::Success(value) => Ok(RunOutcome {
                status_code: 200,
                body: value.to_string(),
                truncated: false,
            }),
            Behavior::ApplicationError(msg) => Ok(RunOutcome {
                status_code: 200,
                body: serde_json::json!({ "error": msg }).to_string(),
                truncated: false,
            }),
            Behavior::DeveloperError(status) => {
                Ok(RunOutcome { status_code: status, body: String::new(), truncated: false })
            }
            Behavior::Sleep(duration, inner) => {
                match tokio::time::timeout(deadline, tokio::time::sleep(duration)).await {
                    Ok(()) => resolve_behavior(*inner, deadline).await,
                    Err(_) => Err(RunError::Timeout),
                }
            }
            Behavior::ConnectionDrop => Err(RunError::Connection("connection reset".into())),
        }
    })
}
