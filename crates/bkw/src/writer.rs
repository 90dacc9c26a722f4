//! 🚚 The Bulk Writer: accepts documents, batches them, ships them on a timer,
//! and keeps its composure when the store goes dark.
//!
//! 🎬 COLD OPEN: INT. DATA CENTER, 2:13 AM. A load balancer hiccups.
//! Four hundred log lines are mid-flight. Nobody is awake.
//! The buffer holds them. The buffer always holds them. Up to `buffer_limit`, anyway.
//!
//! 🧠 Knowledge graph:
//! - `BulkWriter` is a cloneable handle. All state lives in one worker task
//!   (`worker.rs`), reached over a command channel.
//! - `buffering = true`: appends land in the buffer, a tick every `interval_ms`
//!   drains it into one bulk request.
//! - `buffering = false`: every append is its own singleton bulk request.
//! - A failed request puts its docs back at the front of the buffer (trimming
//!   the newest arrivals if that overflows), stops ticking, and starts a health
//!   check. A successful health check restarts ticking with an immediate tick.
//! - Per-item failures inside a successful request are logged and counted, never retried.
//!
//! 🦆 the duck does not retry. the duck has accepted its fate.

mod buffer;
mod health;
mod worker;

use anyhow::Result;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::backends::ClientBackend;
use crate::common::{ActiveShards, BufferedDoc};
use crate::error::WriterError;
use crate::retry::RetryPolicy;
use worker::{Command, Worker, WriterWorker};

/// 🔧 Writer knobs, as read from `[writer]` in the config file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WriterConfig {
    /// ⏱️ Tick period, and the store-side timeout of every bulk request.
    #[serde(default = "default_interval_ms", alias = "interval")]
    pub interval_ms: u64,
    /// Passed through verbatim as the `wait_for_active_shards` query parameter.
    #[serde(default)]
    pub wait_for_active_shards: Option<ActiveShards>,
    /// Ingest pipeline named on every action line.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// 🪣 Max docs held in the buffer. `None` = unbounded (and good luck to your RAM).
    #[serde(default)]
    pub buffer_limit: Option<usize>,
    /// true = batch on a timer, false = write each doc immediately.
    #[serde(default)]
    pub buffering: bool,
    /// 🔁 How the health check retries while the store is unreachable.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_interval_ms() -> u64 {
    5000
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            wait_for_active_shards: None,
            pipeline: None,
            buffer_limit: None,
            buffering: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.interval_ms > 0,
            "💀 writer.interval_ms must be greater than zero. A zero interval is not a batch, it's a busy loop."
        );
        anyhow::ensure!(
            self.buffer_limit != Some(0),
            "💀 writer.buffer_limit must be greater than zero when set. A buffer that holds nothing is a very elaborate /dev/null."
        );
        anyhow::ensure!(
            self.retry.min_delay_ms > 0 && self.retry.max_delay_ms >= self.retry.min_delay_ms,
            "💀 writer.retry needs 0 < min_delay_ms <= max_delay_ms (got {} and {})",
            self.retry.min_delay_ms,
            self.retry.max_delay_ms
        );
        anyhow::ensure!(
            self.retry.max_attempts != Some(0),
            "💀 writer.retry.max_attempts must be at least 1 when set"
        );
        Ok(())
    }
}

/// 📡 What the writer currently believes about the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never checked, or a check is underway after a failure.
    #[default]
    Unknown,
    Connected,
}

/// 📊 Running counters. Cheap to snapshot, expensive to ignore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Docs taken in (buffered, or dispatched in pass-through mode).
    pub accepted: usize,
    /// Docs refused at the door: buffer full, or the writer was closing.
    pub dropped: usize,
    /// Docs the store confirmed.
    pub written: usize,
    /// Docs the store rejected individually inside an otherwise fine request.
    pub item_failures: usize,
    /// Bulk requests that failed as a whole.
    pub failed_requests: usize,
    /// Docs put back into the buffer after a failed request.
    pub requeued: usize,
    /// Buffered docs cut to make room for a requeued batch.
    pub discarded_on_requeue: usize,
    /// Flush writes started (tick, on-demand, close).
    pub flushes: usize,
    pub buffered: usize,
    pub connection: ConnectionState,
    pub running: bool,
}

/// 🚰 How a flush ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered, no request was made.
    Empty,
    /// The request went through. `item_failures` of the `docs` were rejected individually.
    Written { docs: usize, item_failures: usize },
    /// The request failed and its docs went back into the buffer. `discarded`
    /// buffered docs were cut to make room.
    Requeued { docs: usize, discarded: usize },
}

/// 🚚 Handle to a running bulk writer. Clone freely, every clone talks to the same worker.
///
/// The worker lives until `close()` is called or every handle is dropped, in
/// which case it flushes once more and exits quietly.
#[derive(Debug, Clone)]
pub struct BulkWriter {
    commands: async_channel::Sender<Command>,
}

impl BulkWriter {
    /// 🏗️ Validate `config` and spawn the worker. Must be called inside a tokio runtime.
    ///
    /// The writer starts stopped. Call `start()` to check the connection and begin ticking.
    pub fn new(client: ClientBackend, config: WriterConfig) -> Result<Self> {
        config.validate()?;
        let (commands, inbox) = async_channel::unbounded();
        // 🧵 detached: the worker ends itself on close, its handle has nothing to add
        let _worker = WriterWorker::new(config, client, inbox).start();
        Ok(Self { commands })
    }

    /// 🚀 Check the connection, then (in batching mode) start ticking.
    ///
    /// Resolves once the health check settles. Under the default retry policy
    /// that means once the store answers, however long that takes.
    pub async fn start(&self) -> Result<(), WriterError> {
        self.ask(Command::Start).await?
    }

    /// ⏸️ Stop ticking. Idempotent. A write already in flight still completes.
    pub fn stop(&self) {
        self.tell(Command::Stop);
    }

    /// 📥 Hand a document to the writer. Fire and forget: a full buffer drops it with a warning.
    pub fn append(
        &self,
        index: impl Into<String>,
        doc_type: impl Into<String>,
        payload: serde_json::Value,
    ) {
        self.tell(Command::Append(BufferedDoc::new(index, doc_type, payload)));
    }

    /// 🚰 Flush the buffer now, the same way a tick would.
    ///
    /// If a flush is already in flight, waits for it, then flushes whatever
    /// arrived in the meantime.
    pub async fn flush(&self) -> Result<FlushOutcome, WriterError> {
        self.ask(Command::Flush).await
    }

    pub async fn stats(&self) -> Result<WriterStats, WriterError> {
        self.ask(Command::Stats).await
    }

    /// 🔍 A copy of what is buffered right now, in flush order.
    pub async fn buffered(&self) -> Result<Vec<BufferedDoc>, WriterError> {
        self.ask(Command::Snapshot).await
    }

    /// 🏁 Stop, drain in-flight writes, flush one last time, and shut the worker down.
    ///
    /// The final flush is not retried. Whatever is still buffered afterwards is
    /// logged as lost. Returns the final counters.
    pub async fn close(self) -> Result<WriterStats, WriterError> {
        self.ask(Command::Close).await
    }

    fn tell(&self, command: Command) {
        if let Err(refused) = self.commands.try_send(command) {
            debug!(
                "📭 bulk writer is gone, ignoring {:?}",
                refused.into_inner()
            );
        }
    }

    async fn ask<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, WriterError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| WriterError::WorkerGone)?;
        answer.await.map_err(|_| WriterError::WorkerGone)
    }
}
