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

//! Activation log plumbing: a broadcast channel per in-flight activation so
//! the log forwarder and any interactive consumer (the demo CLI) can read
//! the same stream.

pub mod log_channel;

use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing` subscriber. Call once, from
/// `bin/main.rs`. Level is controlled by `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
