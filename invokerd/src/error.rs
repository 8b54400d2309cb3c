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

//! Crate-boundary error type composing every module's own error enum, the
//! way `CellsServiceError` composes `CellsError`/`ExecutablesError` in the
//! daemon this crate is grounded on.

use crate::accountant::AccountantError;
use crate::action::ActionStoreError;
use crate::driver::DriverError;
use crate::pool::PoolError;
use crate::proxy::ProxyError;
use crate::runner::RunnerError;

#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    #[error(transparent)]
    Accountant(#[from] AccountantError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    ActionStore(#[from] ActionStoreError),
}
