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

//! Pool configuration. Plain, `serde`-deserializable, no ambient globals:
//! a [`PoolConfig`] is built once (from a file, in `bin/main.rs`, or with
//! [`PoolConfig::default`] in tests) and passed into the pool at
//! construction.

use crate::action::ContainerKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrewarmConfig {
    pub kind: ContainerKind,
    pub memory_mb: u32,
    pub count: usize,
    #[serde(default = "default_max_age_s")]
    pub max_age_s: u64,
}

fn default_max_age_s() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub memory_limit_mb: u32,
    #[serde(default)]
    pub prewarm: Vec<PrewarmConfig>,
    #[serde(default = "default_idle_grace_ms")]
    pub idle_grace_ms: u64,
    #[serde(default = "default_eviction_lru")]
    pub eviction_lru: bool,
    #[serde(default = "default_concurrent_peek")]
    pub concurrent_peek: usize,
    #[serde(default = "default_namespace_concurrency")]
    pub namespace_concurrency_default: u32,
    /// Open question (a): whether a failed `pause` should mark the
    /// container `Removing`. Defaults to the tolerant behavior spec.md
    /// chose; see DESIGN.md.
    #[serde(default)]
    pub pause_failure_is_fatal: bool,
    /// Open question (b): bounded wait for a driver's end-of-activation
    /// sentinel log line before falling back to a timestamp cutoff.
    #[serde(default = "default_log_sentinel_timeout_ms")]
    pub log_sentinel_timeout_ms: u64,
    /// Bounded retry count for transient create/init failures before any
    /// user code has run (see SPEC_FULL.md, "bounded retry").
    #[serde(default = "default_pre_execution_retries")]
    pub pre_execution_retries: u32,
}

fn default_idle_grace_ms() -> u64 {
    50_000
}

fn default_eviction_lru() -> bool {
    true
}

fn default_concurrent_peek() -> usize {
    32
}

fn default_namespace_concurrency() -> u32 {
    16
}

fn default_log_sentinel_timeout_ms() -> u64 {
    2_000
}

fn default_pre_execution_retries() -> u32 {
    2
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 2048,
            prewarm: Vec::new(),
            idle_grace_ms: default_idle_grace_ms(),
            eviction_lru: default_eviction_lru(),
            concurrent_peek: default_concurrent_peek(),
            namespace_concurrency_default: default_namespace_concurrency(),
            pause_failure_is_fatal: false,
            log_sentinel_timeout_ms: default_log_sentinel_timeout_ms(),
            pre_execution_retries: default_pre_execution_retries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_json() {
        let json = r#"{"memory_limit_mb": 1024}"#;
        let config: PoolConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.memory_limit_mb, 1024);
        assert_eq!(config.idle_grace_ms, 50_000);
        assert!(config.eviction_lru);
        assert!(config.prewarm.is_empty());
    }
}
