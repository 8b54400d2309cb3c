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

use crate::driver::{CreateError, DriverError, InitError, RunError};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("container is not in a state that allows this operation: {0}")]
    WrongState(String),
    #[error(transparent)]
    Create(#[from] CreateError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// A driver-level `RunError` always ends the container's life (spec §4.B:
/// a timed-out or disconnected container is never trusted to be clean).
/// This only distinguishes the *reason* so the proxy can log and report
/// the right activation status; it never governs whether the container is
/// reused, which is always "no" for a `RunError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFailureReason {
    /// Exceeded its deadline; reported to the caller as a timeout.
    Timeout,
    /// Lost the connection or received an oversized body after the
    /// container was already live; reported as an internal/whisk error.
    Fatal,
}

pub fn classify_run_error(err: &RunError) -> RunFailureReason {
    match err {
        RunError::Timeout => RunFailureReason::Timeout,
        RunError::Connection(_) | RunError::TooLarge => RunFailureReason::Fatal,
    }
}
