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

//! The sandbox driver capability interface. This is the only surface the
//! pool uses to talk to whatever actually runs a container (Docker,
//! Kubernetes, Lambda, ...); the pool never assumes a driver-specific error
//! beyond the taxonomy below.

pub mod mock;

use crate::action::ContainerKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// Opaque sandbox identity handed back by `create` and used for every other
/// driver call against that container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for creating a fresh, not-yet-initialized container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub kind: ContainerKind,
    pub memory_mb: u32,
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
}

/// Body posted to `/init`.
#[derive(Debug, Clone)]
pub struct CodeDescriptor {
    pub code: String,
    pub binary: bool,
    pub main: String,
    pub env: Vec<(String, String)>,
}

/// Outcome of a single `/run` request/response.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status_code: u16,
    pub body: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub time: DateTime<Utc>,
    pub stream: LogStream,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("timed out waiting for the container to become reachable")]
    Timeout,
    #[error("failed to pull image for kind '{0}'")]
    ImagePull(ContainerKind),
    #[error("driver rejected the create request: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init returned status {status}: {diagnostic}")]
    BadStatus { status: u16, diagnostic: String },
    #[error("timed out waiting for init to complete")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("deadline exceeded before a response was received")]
    Timeout,
    #[error("connection to the container was lost: {0}")]
    Connection(String),
    #[error("response body exceeded the configured maximum size")]
    TooLarge,
}

/// Errors from driver calls that are not part of the run-critical path
/// (pause/resume/destroy/logs). These never determine fatal/non-fatal
/// classification of an activation on their own; the proxy decides that.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("create failed: {0}")]
    Create(#[from] CreateError),
    #[error("init failed: {0}")]
    Init(#[from] InitError),
    #[error("run failed: {0}")]
    Run(#[from] RunError),
    #[error("driver call failed on handle {handle}: {reason}")]
    Call { handle: ContainerHandle, reason: String },
}

/// Create/start/stop/pause/resume/destroy a container; stream logs; post
/// JSON to the container's HTTP endpoint. Every operation is idempotent on
/// repeated identical inputs except `create`.
///
/// A future Lambda-style driver distinguishes "Handled" (user code ran and
/// raised) from "Unhandled" (runtime-level) errors; map Handled to
/// `InitError`/an application-level `RunOutcome` body, and Unhandled to
/// `RunError::Connection`, so the rest of the pool sees only this taxonomy.
#[async_trait]
pub trait SandboxDriver: Send + Sync + 'static {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, CreateError>;

    async fn init(
        &self,
        handle: &ContainerHandle,
        code: &CodeDescriptor,
    ) -> Result<(), InitError>;

    async fn run(
        &self,
        handle: &ContainerHandle,
        args: Value,
        deadline: Duration,
    ) -> Result<RunOutcome, RunError>;

    async fn pause(&self, handle: &ContainerHandle) -> Result<(), DriverError>;

    async fn resume(&self, handle: &ContainerHandle) -> Result<(), DriverError>;

    /// Idempotent and final. The caller (the proxy) decrements the
    /// accountant exactly once regardless of whether this returns `Ok`.
    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), DriverError>;

    async fn logs(
        &self,
        handle: &ContainerHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogLine>, DriverError>;
}
