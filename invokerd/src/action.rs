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

//! Action identity and the lookup interface the pool uses to resolve one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The runtime image family a container is built from (e.g. `nodejs:18`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerKind(pub String);

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for ContainerKind {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}

/// Stable identity of an action, independent of revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Everything the pool and runner need to know about one action revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub key: ActionKey,
    pub revision: u64,
    pub code_ref: String,
    pub kind: ContainerKind,
    pub memory_mb: u32,
    pub time_limit_s: u32,
    /// Concurrent activations a single container of this action may serve.
    pub concurrent_limit: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ActionStoreError {
    #[error("action '{key}' not found")]
    NotFound { key: ActionKey },
    #[error("action store lookup failed: {0}")]
    Backend(String),
}

/// Key→action-code+limits lookup. Specified only by this interface; the
/// concrete metadata store lives outside this crate.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn get_action(
        &self,
        key: &ActionKey,
        revision: Option<u64>,
    ) -> Result<ActionDescriptor, ActionStoreError>;
}
