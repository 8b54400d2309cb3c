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

/// The error taxonomy visible at the pool boundary (spec §7). Every
/// activation produces exactly one [`super::ActivationRecord`] whose
/// status is derived from one of these, or from `Ok`.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("system overloaded")]
    SystemOverloaded,
    #[error("action not found")]
    ActionNotFound,
    #[error("container could not initialize user code: {0}")]
    InitFailure(String),
    #[error("run exceeded its deadline")]
    Timeout,
    #[error("non-2xx response from run: {0}")]
    DeveloperError(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("failed to write the activation record or forward logs: {0}")]
    Sink(String),
}
