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

use crate::pool::ContainerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch::Sender;
use tracing::info;

/// Waits for SIGTERM/SIGINT, then tells the work feed to stop pulling and
/// drains the pool (spec §5: cancel queued work, await in-flight up to a
/// grace window, force-destroy the remainder).
pub struct GracefulShutdown {
    pool: Arc<ContainerPool>,
    feed_shutdown: Sender<bool>,
    grace: Duration,
}

impl GracefulShutdown {
    pub fn new(pool: Arc<ContainerPool>, feed_shutdown: Sender<bool>, grace: Duration) -> Self {
        Self { pool, feed_shutdown, grace }
    }

    /// Returns after processing the first received signal and completing
    /// the drain.
    pub async fn wait(self) {
        tokio::select! {
            _ = wait_for_sigterm() => {},
            _ = wait_for_sigint() => {},
        }

        info!("shutdown signal received");
        let _ = self.feed_shutdown.send(true);
        self.pool.shutdown(self.grace).await;
    }
}

pub async fn wait_for_sigterm() {
    let mut stream =
        tokio::signal::unix::signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
    let _ = stream.recv().await;
}

pub async fn wait_for_sigint() {
    let mut stream =
        tokio::signal::unix::signal(SignalKind::interrupt()).expect("failed to listen for SIGINT");
    let _ = stream.recv().await;
}
