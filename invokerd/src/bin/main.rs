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

// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(clippy::unwrap_used)]

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use invokerd::action::{ActionDescriptor, ActionKey, ActionStore, ActionStoreError, ContainerKind};
use invokerd::config::PoolConfig;
use invokerd::driver::mock::MockDriver;
use invokerd::driver::LogLine;
use invokerd::feed::{InboundMessage, MessageSource, WorkFeed, WorkFeedConfig};
use invokerd::graceful_shutdown::GracefulShutdown;
use invokerd::logging;
use invokerd::pool::ContainerPool;
use invokerd::runner::{ActivationRecord, ActivationRunner, ActivationSink, LogForwarder, RunnerError, WorkItem};
use invokerd::telemetry::Telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Default exit code for successful termination.
pub const EXIT_OKAY: i32 = 0;
/// Default exit code for a runtime error.
pub const EXIT_ERROR: i32 = 1;
/// Fatal configuration error: an unreadable or unparseable config file.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// Sandbox driver initialization failure.
pub const EXIT_DRIVER_INIT_FAILURE: i32 = 3;

/// Command line options for invokerd.
///
/// This binary is a demonstration harness: it wires an in-memory sandbox
/// driver, a one-action seed catalogue, and a small fixed batch of
/// invocations through a real [`ContainerPool`] and [`WorkFeed`], then prints
/// the resulting activation records and a final pool snapshot. A production
/// deployment would replace the mock driver, action store and message
/// source with real collaborators; the pool, runner and feed are unchanged.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct InvokerdOptions {
    /// Path to a JSON file with the pool configuration. Falls back to
    /// `PoolConfig::default()` when omitted.
    #[clap(long, value_parser)]
    config: Option<String>,
    /// Aggregate memory budget in megabytes, overriding the config file.
    #[clap(long, value_parser)]
    memory_limit_mb: Option<u32>,
    /// Grace period, in milliseconds, for draining in-flight activations
    /// on shutdown.
    #[clap(long, value_parser, default_value_t = 5_000)]
    shutdown_grace_ms: u64,
    /// Forces sandbox driver construction to fail, to exercise exit code 3.
    #[clap(long)]
    simulate_driver_init_failure: bool,
    #[clap(subcommand)]
    subcmd: Option<SubCommands>,
}

#[derive(Subcommand, Debug)]
enum SubCommands {
    /// Submits a fixed demo batch of invocations, prints the results and a
    /// final pool snapshot, then exits (no signal handling).
    Demo {
        #[clap(short, long, value_parser, default_value_t = 6)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();
    let options = InvokerdOptions::parse();

    let exit_code = match &options.subcmd {
        Some(SubCommands::Demo { count }) => run_demo_batch(&options, *count).await,
        None => run_serving(options).await,
    };

    std::process::exit(exit_code);
}

/// Loads the pool configuration from `--config`, falling back to
/// `PoolConfig::default()` only when no path was given. An unreadable or
/// unparseable config file is a fatal configuration error (exit code 2),
/// not a silent fallback.
fn load_config(options: &InvokerdOptions) -> Result<PoolConfig, String> {
    let mut config = match &options.config {
        Some(path) => {
            let contents = std::fs::read_to_string(PathBuf::from(path))
                .map_err(|e| format!("failed to read config file '{path}': {e}"))?;
            serde_json::from_str(&contents)
                .map_err(|e| format!("failed to parse config file '{path}': {e}"))?
        }
        None => PoolConfig::default(),
    };
    if let Some(limit) = options.memory_limit_mb {
        config.memory_limit_mb = limit;
    }
    Ok(config)
}

async fn run_demo_batch(options: &InvokerdOptions, count: u32) -> i32 {
    info!("invokerd demo starting, pid {}", std::process::id());
    let config = match load_config(options) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return EXIT_CONFIG_ERROR;
        }
    };
    let driver = match MockDriver::try_new(options.simulate_driver_init_failure) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!(error = %e, "sandbox driver initialization failed");
            return EXIT_DRIVER_INIT_FAILURE;
        }
    };
    let action = seed_action();
    let action_store: Arc<dyn ActionStore> = Arc::new(StaticActionStore(action.clone()));
    let sink: Arc<dyn ActivationSink> = Arc::new(LoggingSink::default());
    let log_forwarder: Arc<dyn LogForwarder> = Arc::new(LoggingSink::default());
    let telemetry = Telemetry::new();

    let pool = ContainerPool::new(driver, config.clone(), telemetry.clone());
    let runner = Arc::new(ActivationRunner::new(
        pool.clone(),
        action_store,
        sink,
        log_forwarder,
        telemetry.clone(),
        config.clone(),
    ));

    for i in 0..count {
        let item = demo_work_item(&action.key, i);
        match runner.execute(item).await {
            Ok(record) => info!(
                activation_id = %record.activation_id,
                status = ?record.status,
                cold = record.annotations.cold,
                "activation complete"
            ),
            Err(e) => error!(error = %e, "activation failed"),
        }
    }

    let snapshot = pool.snapshot().await;
    info!(?snapshot, activations = telemetry.activations(), cold_starts = telemetry.cold_starts(), "final state");
    pool.shutdown(Duration::from_millis(options.shutdown_grace_ms)).await;
    EXIT_OKAY
}

/// Runs a work feed against an empty demo message source until a shutdown
/// signal arrives. Exists to exercise [`GracefulShutdown`] end to end; a
/// real deployment supplies its own [`MessageSource`].
async fn run_serving(options: InvokerdOptions) -> i32 {
    info!("invokerd starting, pid {}", std::process::id());
    let config = match load_config(&options) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return EXIT_CONFIG_ERROR;
        }
    };
    let driver = match MockDriver::try_new(options.simulate_driver_init_failure) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!(error = %e, "sandbox driver initialization failed");
            return EXIT_DRIVER_INIT_FAILURE;
        }
    };
    let action = seed_action();
    let action_store: Arc<dyn ActionStore> = Arc::new(StaticActionStore(action));
    let sink: Arc<dyn ActivationSink> = Arc::new(LoggingSink::default());
    let log_forwarder: Arc<dyn LogForwarder> = Arc::new(LoggingSink::default());
    let telemetry = Telemetry::new();

    let pool = ContainerPool::new(driver, config.clone(), telemetry.clone());
    let runner = Arc::new(ActivationRunner::new(
        pool.clone(),
        action_store,
        sink,
        log_forwarder,
        telemetry,
        config.clone(),
    ));

    let source: Arc<dyn MessageSource> = Arc::new(EmptyMessageSource::default());
    let feed = Arc::new(WorkFeed::new(
        source,
        runner,
        WorkFeedConfig {
            concurrent_peek: config.concurrent_peek,
            namespace_concurrency_default: config.namespace_concurrency_default,
            max_rejections: config.pre_execution_retries,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let grace = Duration::from_millis(options.shutdown_grace_ms);
    let feed_task = tokio::spawn(feed.run(shutdown_rx, grace));

    GracefulShutdown::new(pool, shutdown_tx, grace).wait().await;
    if let Err(e) = feed_task.await {
        error!(error = %e, "work feed task panicked");
        return EXIT_ERROR;
    }
    info!("invokerd stopped");
    EXIT_OKAY
}

fn seed_action() -> ActionDescriptor {
    ActionDescriptor {
        key: ActionKey { namespace: "guest".into(), name: "hello".into() },
        revision: 1,
        code_ref: "function main(args) { return {payload: args}; }".into(),
        kind: ContainerKind::from("nodejs:18"),
        memory_mb: 256,
        time_limit_s: 30,
        concurrent_limit: 1,
    }
}

fn demo_work_item(key: &ActionKey, i: u32) -> WorkItem {
    let now = Instant::now();
    WorkItem {
        activation_id: Uuid::new_v4(),
        namespace: key.namespace.clone(),
        action_key: key.clone(),
        action_rev: Some(1),
        args: serde_json::json!({ "n": i }),
        transid: format!("demo-{i}"),
        subject: "guest".into(),
        queued_at: now,
        queue_deadline: now + Duration::from_secs(30),
    }
}

struct StaticActionStore(ActionDescriptor);

#[async_trait]
impl ActionStore for StaticActionStore {
    async fn get_action(
        &self,
        key: &ActionKey,
        _revision: Option<u64>,
    ) -> Result<ActionDescriptor, ActionStoreError> {
        if *key == self.0.key {
            Ok(self.0.clone())
        } else {
            Err(ActionStoreError::NotFound { key: key.clone() })
        }
    }
}

#[derive(Default)]
struct LoggingSink {
    records: Mutex<Vec<ActivationRecord>>,
}

#[async_trait]
impl ActivationSink for LoggingSink {
    async fn write(&self, record: &ActivationRecord) -> Result<(), RunnerError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl LogForwarder for LoggingSink {
    async fn forward(&self, activation_id: Uuid, lines: Vec<LogLine>) -> Result<(), RunnerError> {
        for line in lines {
            info!(%activation_id, text = %line.text, "activation log");
        }
        Ok(())
    }
}

/// A [`MessageSource`] that never has work, used only so `run_serving` has
/// a real feed loop to drive while waiting on a signal.
#[derive(Default)]
struct EmptyMessageSource;

#[async_trait]
impl MessageSource for EmptyMessageSource {
    async fn poll(&self, _max: usize) -> Vec<InboundMessage> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Vec::new()
    }

    async fn ack(&self, _msg: &InboundMessage) {}
    async fn nack(&self, _msg: &InboundMessage) {}
}
