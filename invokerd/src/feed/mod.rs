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

//! Pulls invocation messages, enforces per-namespace concurrency, hands
//! work to the pool via the [`ActivationRunner`], and resubmits rejections
//! with bounded exponential backoff (spec §4.D).

pub mod message_source;
pub mod namespace_limiter;

pub use message_source::{InboundMessage, MessageSource};
pub use namespace_limiter::NamespaceLimiter;

use crate::error::InvokerError;
use crate::runner::{ActivationRunner, RunnerError, WorkItem};
use backoff::backoff::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct WorkFeedConfig {
    pub concurrent_peek: usize,
    pub namespace_concurrency_default: u32,
    pub max_rejections: u32,
}

pub struct WorkFeed {
    source: Arc<dyn MessageSource>,
    runner: Arc<ActivationRunner>,
    limiter: Arc<NamespaceLimiter>,
    config: WorkFeedConfig,
    stopping: Arc<AtomicBool>,
}

impl WorkFeed {
    pub fn new(source: Arc<dyn MessageSource>, runner: Arc<ActivationRunner>, config: WorkFeedConfig) -> Self {
        let limiter = Arc::new(NamespaceLimiter::new(config.namespace_concurrency_default));
        Self { source, runner, limiter, config, stopping: Arc::new(AtomicBool::new(false)) }
    }

    /// Runs until `shutdown` fires, then stops pulling and waits for
    /// outstanding in-flight work up to `grace` before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>, grace: Duration) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_ok() && *shutdown.borrow() {
                        break;
                    }
                }
                messages = self.source.poll(self.config.concurrent_peek) => {
                    for msg in messages {
                        let this = Arc::clone(&self);
                        in_flight.spawn(async move { this.handle_one(msg).await });
                    }
                }
            }
        }

        self.stopping.store(true, Ordering::SeqCst);
        info!("work feed draining in-flight messages");
        let deadline = Instant::now() + grace;
        while !in_flight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(outstanding = in_flight.len(), "grace window elapsed; abandoning in-flight messages");
                in_flight.shutdown().await;
                break;
            }
            tokio::select! {
                _ = in_flight.join_next() => {}
                _ = tokio::time::sleep(remaining) => {}
            }
        }
        info!("work feed stopped");
    }

    async fn handle_one(&self, msg: InboundMessage) {
        let namespace = msg.namespace.clone();
        let _permit = self.limiter.acquire(&namespace).await;

        let item = to_work_item(&msg);
        let mut strategy = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(20))
            .with_multiplier(4.0)
            .with_randomization_factor(0.2)
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(Duration::from_secs(30)))
            .build();

        let mut rejections = 0u32;
        loop {
            match self.runner.execute(item.clone()).await {
                Ok(_record) => {
                    self.source.ack(&msg).await;
                    return;
                }
                Err(InvokerError::Runner(RunnerError::SystemOverloaded)) => {
                    rejections += 1;
                    if rejections > self.config.max_rejections {
                        warn!(activation_id = %msg.activation_id, "system overloaded after max rejections");
                        self.source.nack(&msg).await;
                        return;
                    }
                    match strategy.next_backoff() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            self.source.nack(&msg).await;
                            return;
                        }
                    }
                }
                Err(_other) => {
                    // Every other outcome already produced exactly one
                    // activation record; the message is done regardless of
                    // whether that record reports success.
                    self.source.ack(&msg).await;
                    return;
                }
            }
        }
    }
}

fn to_work_item(msg: &InboundMessage) -> WorkItem {
    let now = Instant::now();
    WorkItem {
        activation_id: msg.activation_id,
        namespace: msg.namespace.clone(),
        action_key: msg.action_key.clone(),
        action_rev: msg.action_rev,
        args: msg.args.clone(),
        transid: msg.transid.clone(),
        subject: msg.subject.clone(),
        queued_at: now,
        queue_deadline: now + Duration::from_millis(msg.deadline_ms.max(0) as u64),
    }
}
