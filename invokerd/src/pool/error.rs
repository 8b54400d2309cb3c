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

use crate::accountant::AccountantError;
use crate::driver::CreateError;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Admission refused: no warm/prewarm match, and neither free budget
    /// nor reclaimable idle memory covers the request. Retried upstream.
    #[error("system overloaded: short by {shortfall_mb} MB")]
    SystemOverloaded { shortfall_mb: u32 },
    #[error("failed to create a container: {0}")]
    Create(#[from] CreateError),
    /// Accountant underflow. Fatal: the pool process should exit(4).
    #[error(transparent)]
    AccountantCorruption(#[from] AccountantError),
    #[error("the pool is shutting down and is no longer accepting work")]
    ShuttingDown,
}
