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

//! # invokerd
//!
//! The per-worker container pool for a serverless function platform: given
//! a stream of action-invocation messages, it maintains a population of
//! short-lived sandboxed containers, reuses warm ones, evicts cold ones
//! under memory pressure, and coordinates pause/resume and lifecycle with
//! the host sandbox runtime.
//!
//! This crate is a library. The broker, metadata store, result store, log
//! forwarder and sandbox driver are all external collaborators specified
//! only by the trait interfaces this crate consumes ([`action::ActionStore`],
//! [`feed::MessageSource`], [`runner::ActivationSink`],
//! [`runner::LogForwarder`], [`driver::SandboxDriver`]); `bin/main.rs` wires
//! a concrete (in-memory, mock) implementation of each for demonstration.
//!
//! ## Layout
//!
//! - [`driver`] — the sandbox capability interface and a mock implementation.
//! - [`action`] — action identity and the metadata-lookup interface.
//! - [`accountant`] — the aggregate memory budget.
//! - [`proxy`] — one container's lifecycle state machine.
//! - [`pool`] — admission, selection, eviction, prewarm.
//! - [`feed`] — message pull, per-namespace concurrency, backoff retry.
//! - [`runner`] — drives init/run against an assigned container.
//! - [`telemetry`] — counters, histograms, and a pool snapshot for tests.
//! - [`config`] — [`config::PoolConfig`], the only configuration surface.

pub mod accountant;
pub mod action;
pub mod config;
pub mod driver;
pub mod error;
pub mod feed;
pub mod graceful_shutdown;
pub mod logging;
pub mod pool;
pub mod proxy;
pub mod runner;
pub mod telemetry;

pub use config::PoolConfig;
pub use error::InvokerError;
pub use pool::ContainerPool;
