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

use crate::action::{ActionKey, ContainerKind};
use crate::driver::ContainerHandle;
use tokio::time::Instant;

/// One container's position in its lifecycle. See spec §4.B for the full
/// transition diagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Starting,
    Prewarmed,
    Initialized { action: ActionKey, revision: u64 },
    Running,
    Paused,
    Removing,
    Gone,
}

impl ContainerState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ContainerState::Prewarmed | ContainerState::Initialized { .. })
    }

    pub fn initialized_for(&self) -> Option<(&ActionKey, u64)> {
        match self {
            ContainerState::Initialized { action, revision } => Some((action, *revision)),
            _ => None,
        }
    }
}

/// Container record, owned exclusively by its [`super::ContainerProxy`].
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub id: ContainerHandle,
    pub kind: ContainerKind,
    pub memory_mb: u32,
    pub state: ContainerState,
    pub last_used_at: Instant,
    pub created_at: Instant,
    pub in_flight: u32,
    pub concurrent_limit: u32,
    /// Sticky flag set on an unrecoverable fault; such a container is never
    /// reused even if it is momentarily observed idle.
    pub unusable: bool,
}

impl ContainerRecord {
    pub fn new(id: ContainerHandle, kind: ContainerKind, memory_mb: u32) -> Self {
        let now = Instant::now();
        Self {
            id,
            kind,
            memory_mb,
            state: ContainerState::Starting,
            last_used_at: now,
            created_at: now,
            in_flight: 0,
            concurrent_limit: 1,
            unusable: false,
        }
    }
}
