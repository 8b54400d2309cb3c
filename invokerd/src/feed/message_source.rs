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

use crate::action::ActionKey;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// One invocation record as delivered by the broker (spec §6). `deadline_ms`
/// is the time-to-live, in milliseconds, remaining when the message was
/// pulled off the broker; the feed turns it into an absolute deadline.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub activation_id: Uuid,
    pub namespace: String,
    pub action_key: ActionKey,
    pub action_rev: Option<u64>,
    pub args: Value,
    pub transid: String,
    pub deadline_ms: i64,
    pub subject: String,
}

/// A pull source with explicit per-message acknowledge. The broker itself
/// is out of scope; this is the only surface the feed uses.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn poll(&self, max: usize) -> Vec<InboundMessage>;
    async fn ack(&self, msg: &InboundMessage);
    async fn nack(&self, msg: &InboundMessage);
}
