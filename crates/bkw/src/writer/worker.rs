//! 🎬 *[a channel fills with documents. somewhere, a timer ticks.]*
//! *[the cluster is down. the worker does not panic. the worker requeues.]*
//!
//! 🧵 The WriterWorker: the one task that owns the buffer, the running flag,
//! the next tick deadline and the connection state. Nobody else touches them.
//! Handles send `Command`s; spawned writes and health checks report back as
//! `Event`s on a second channel that only the worker holds a sender for.
//!
//! 🧠 Knowledge graph (the state machine):
//! - Idle → (tick) → Flushing → (write ok) → Idle, timer re-armed.
//! - Flushing → (write failed) → Suspended: batch requeued, ticking stopped,
//!   health check started.
//! - Suspended → (health check ok, buffering on) → running again, immediate tick.
//! - At most one flush write in flight. A tick that finds one in flight is
//!   skipped; the timer is re-armed when that write settles.
//! - At most one health check task at a time.
//!
//! 🦆

use std::future::pending;
use std::mem;
use std::time::Duration;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use super::buffer::DocBuffer;
use super::health::await_connection;
use super::{ConnectionState, FlushOutcome, WriterConfig, WriterStats};
use crate::backends::{BulkClient, ClientBackend};
use crate::common::{BufferedDoc, BulkRequest, BulkResponse};
use crate::error::WriterError;

/// 🏗️ A background worker, that does work. duh.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 📨 What a `BulkWriter` handle can ask of the worker.
#[derive(Debug)]
pub(crate) enum Command {
    Append(BufferedDoc),
    Start(oneshot::Sender<Result<(), WriterError>>),
    Stop,
    Flush(oneshot::Sender<FlushOutcome>),
    Stats(oneshot::Sender<WriterStats>),
    Snapshot(oneshot::Sender<Vec<BufferedDoc>>),
    Close(oneshot::Sender<WriterStats>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOrigin {
    Flush,
    PassThrough,
}

/// 📬 Completions from tasks the worker spawned.
#[derive(Debug)]
enum Event {
    WriteSettled {
        origin: WriteOrigin,
        batch: Vec<BufferedDoc>,
        result: Result<BulkResponse>,
    },
    HealthChecked(Result<(), WriterError>),
}

#[derive(Debug)]
pub(crate) struct WriterWorker {
    config: WriterConfig,
    client: ClientBackend,
    commands: Receiver<Command>,
    commands_open: bool,
    events: Receiver<Event>,
    events_tx: Sender<Event>,

    buffer: DocBuffer,
    running: bool,
    next_tick: Option<Instant>,
    connection: ConnectionState,

    flush_in_flight: bool,
    pass_through_in_flight: usize,
    /// 🎟️ waiting on the flush currently in flight
    flush_waiters: Vec<oneshot::Sender<FlushOutcome>>,
    /// 🎟️ asked for a flush while another was in flight; served right after it settles
    deferred_flush_waiters: Vec<oneshot::Sender<FlushOutcome>>,

    health_check: Option<JoinHandle<()>>,
    start_waiters: Vec<oneshot::Sender<Result<(), WriterError>>>,

    closing: Option<Closing>,
    stats: WriterStats,
}

#[derive(Debug)]
struct Closing {
    reply: Option<oneshot::Sender<WriterStats>>,
    final_flush_sent: bool,
}

impl WriterWorker {
    pub(crate) fn new(
        config: WriterConfig,
        client: ClientBackend,
        commands: Receiver<Command>,
    ) -> Self {
        let (events_tx, events) = async_channel::unbounded();
        Self {
            config,
            client,
            commands,
            commands_open: true,
            events,
            events_tx,
            buffer: DocBuffer::default(),
            running: false,
            next_tick: None,
            connection: ConnectionState::Unknown,
            flush_in_flight: false,
            pass_through_in_flight: 0,
            flush_waiters: Vec::new(),
            deferred_flush_waiters: Vec::new(),
            health_check: None,
            start_waiters: Vec::new(),
            closing: None,
            stats: WriterStats::default(),
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms)
    }

    async fn run(mut self) -> Result<()> {
        debug!("🧵 WriterWorker started");
        loop {
            let next_tick = self.next_tick;
            let tick = async move {
                match next_tick {
                    Some(deadline) => sleep_until(deadline).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                command = self.commands.recv(), if self.commands_open => match command {
                    Ok(command) => self.on_command(command),
                    Err(_) => {
                        debug!("🏁 every BulkWriter handle is gone, closing up shop");
                        self.commands_open = false;
                        self.begin_close(None);
                    }
                },
                Ok(event) = self.events.recv() => self.on_event(event),
                _ = tick => {
                    self.next_tick = None;
                    self.tick();
                }
            }

            if self.try_finish_close() {
                break;
            }
        }
        if let Some(health_check) = self.health_check.take() {
            health_check.abort();
        }
        debug!("🏁 WriterWorker stopped");
        Ok(())
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Append(doc) => self.append(doc),
            Command::Start(reply) => {
                self.start_waiters.push(reply);
                self.check_connection();
                info!("🩺 start requested, checking the connection first");
            }
            Command::Stop => self.stop(),
            Command::Flush(reply) => self.flush_on_demand(reply),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats_snapshot());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.buffer.snapshot());
            }
            Command::Close(reply) => self.begin_close(Some(reply)),
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::WriteSettled {
                origin,
                batch,
                result,
            } => self.on_write_settled(origin, batch, result),
            Event::HealthChecked(result) => self.on_health_checked(result),
        }
    }

    // ===== append / tick / flush =====

    fn append(&mut self, doc: BufferedDoc) {
        if self.closing.is_some() {
            warn!("🗑️ append after close, dropping doc for index '{}'", doc.index);
            self.stats.dropped += 1;
            return;
        }

        if !self.config.buffering {
            self.stats.accepted += 1;
            self.pass_through_in_flight += 1;
            self.dispatch_write(WriteOrigin::PassThrough, vec![doc]);
            return;
        }

        match self.buffer.push_bounded(doc, self.config.buffer_limit) {
            Ok(()) => self.stats.accepted += 1,
            Err(dropped) => {
                self.stats.dropped += 1;
                warn!(
                    "🚫 buffer is full ({} docs), dropping doc for index '{}'",
                    self.buffer.len(),
                    dropped.index
                );
            }
        }
    }

    fn tick(&mut self) {
        trace!("⏱️ tick");
        if !self.running {
            return;
        }
        if self.flush_in_flight {
            debug!("⏳ tick skipped, a flush is still in flight");
            return;
        }
        if !self.start_flush() {
            self.schedule();
        }
    }

    /// ⏰ Arm the one-shot timer, unless stopped or already armed.
    fn schedule(&mut self) {
        if self.running && self.next_tick.is_none() {
            self.next_tick = Some(Instant::now() + self.interval());
        }
    }

    /// 🚰 Detach the buffer and send it. Returns false when there was nothing to send.
    fn start_flush(&mut self) -> bool {
        if self.buffer.is_empty() {
            debug!("🫙 nothing to flush");
            return false;
        }
        let batch = self.buffer.take_all();
        debug!("🚰 flushing {} docs", batch.len());
        self.flush_in_flight = true;
        self.stats.flushes += 1;
        self.dispatch_write(WriteOrigin::Flush, batch);
        true
    }

    fn flush_on_demand(&mut self, reply: oneshot::Sender<FlushOutcome>) {
        if self.flush_in_flight {
            self.deferred_flush_waiters.push(reply);
        } else if self.start_flush() {
            self.flush_waiters.push(reply);
        } else {
            let _ = reply.send(FlushOutcome::Empty);
        }
    }

    fn dispatch_write(&self, origin: WriteOrigin, batch: Vec<BufferedDoc>) {
        let request = BulkRequest::new(
            batch,
            self.config.pipeline.clone(),
            self.config.wait_for_active_shards.clone(),
            self.interval(),
        );
        let client = self.client.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = client.bulk(&request).await;
            let settled = Event::WriteSettled {
                origin,
                batch: request.into_docs(),
                result,
            };
            if events.send(settled).await.is_err() {
                warn!("📭 write settled after the worker exited, outcome dropped");
            }
        });
    }

    fn on_write_settled(
        &mut self,
        origin: WriteOrigin,
        batch: Vec<BufferedDoc>,
        result: Result<BulkResponse>,
    ) {
        match origin {
            WriteOrigin::Flush => self.flush_in_flight = false,
            WriteOrigin::PassThrough => {
                self.pass_through_in_flight = self.pass_through_in_flight.saturating_sub(1)
            }
        }

        let failed = result.is_err();
        let outcome = match result {
            Ok(response) => self.record_success(&batch, &response),
            Err(err) => self.requeue_failed(batch, err),
        };

        if origin == WriteOrigin::Flush {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(outcome.clone());
            }
            let deferred = mem::take(&mut self.deferred_flush_waiters);
            if !deferred.is_empty() {
                if failed {
                    // 🔌 the store just fell over, a second attempt right now would too
                    for waiter in deferred {
                        let _ = waiter.send(outcome.clone());
                    }
                } else if self.start_flush() {
                    self.flush_waiters = deferred;
                } else {
                    for waiter in deferred {
                        let _ = waiter.send(FlushOutcome::Empty);
                    }
                }
            }
            self.schedule();
        }
        self.retry_requeued();
    }

    /// ↩️ Pass-through mode only buffers what failed. Once the store is back and
    /// nothing else is in flight, send it again.
    fn retry_requeued(&mut self) {
        if self.config.buffering
            || self.closing.is_some()
            || self.flush_in_flight
            || self.health_check.is_some()
            || self.connection != ConnectionState::Connected
            || self.buffer.is_empty()
        {
            return;
        }
        if self.start_flush() {
            debug!("↩️ retrying docs requeued while the store was away");
        }
    }

    fn record_success(&mut self, batch: &[BufferedDoc], response: &BulkResponse) -> FlushOutcome {
        let mut item_failures = 0;
        for (position, outcome) in response.failed_items() {
            item_failures += 1;
            let target = batch
                .get(position)
                .map(|doc| doc.index.as_str())
                .or(outcome.index.as_deref())
                .unwrap_or("?");
            warn!(
                "💀 store rejected item {} for index '{}' (status {}): {}",
                position,
                target,
                outcome.status,
                outcome
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            );
        }
        self.stats.written += batch.len().saturating_sub(item_failures);
        self.stats.item_failures += item_failures;
        debug!(
            "✅ wrote {} docs ({} rejected per item)",
            batch.len(),
            item_failures
        );
        FlushOutcome::Written {
            docs: batch.len(),
            item_failures,
        }
    }

    fn requeue_failed(&mut self, batch: Vec<BufferedDoc>, err: anyhow::Error) -> FlushOutcome {
        let docs = batch.len();
        self.stats.failed_requests += 1;
        self.stats.requeued += docs;
        let discarded = self.buffer.requeue_front(batch, self.config.buffer_limit);
        self.stats.discarded_on_requeue += discarded;
        error!(
            "💀 bulk request for {} docs failed, requeued ahead of {} buffered ({} newest discarded): {:#}",
            docs,
            self.buffer.len().saturating_sub(docs),
            discarded,
            err
        );

        if self.closing.is_none() {
            self.stop();
            self.check_connection();
        }
        FlushOutcome::Requeued { docs, discarded }
    }

    // ===== lifecycle =====

    fn stop(&mut self) {
        let was_active = self.running || self.next_tick.is_some();
        self.running = false;
        self.next_tick = None;
        if was_active {
            info!("⏸️ bulk writer stopped");
        }
    }

    fn check_connection(&mut self) {
        if self.health_check.is_some() {
            debug!("🩺 health check already running, not starting another");
            return;
        }
        self.connection = ConnectionState::Unknown;
        let client = self.client.clone();
        let policy = self.config.retry.clone();
        let events = self.events_tx.clone();
        self.health_check = Some(tokio::spawn(async move {
            let result = await_connection(&client, &policy).await;
            let _ = events.send(Event::HealthChecked(result)).await;
        }));
    }

    fn on_health_checked(&mut self, result: Result<(), WriterError>) {
        self.health_check = None;
        for waiter in self.start_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }

        if let Err(err) = result {
            error!(
                "💀 {} ({} docs stay buffered, ticking stays off)",
                err,
                self.buffer.len()
            );
            return;
        }

        self.connection = ConnectionState::Connected;
        if self.closing.is_some() {
            return;
        }
        if self.config.buffering {
            info!("🚀 starting bulk writer");
            self.running = true;
            self.tick();
        } else {
            self.retry_requeued();
        }
    }

    fn begin_close(&mut self, reply: Option<oneshot::Sender<WriterStats>>) {
        self.stop();
        match self.closing {
            Some(ref mut closing) => {
                // 🔁 closed twice: the second caller gets the same ending
                if closing.reply.is_none() {
                    closing.reply = reply;
                }
            }
            None => {
                info!("🗑️ closing bulk writer");
                self.closing = Some(Closing {
                    reply,
                    final_flush_sent: false,
                });
            }
        }
    }

    /// 🏁 Drives the close sequence. True once the worker may exit.
    fn try_finish_close(&mut self) -> bool {
        let Some(closing) = self.closing.as_ref() else {
            return false;
        };
        if self.flush_in_flight || self.pass_through_in_flight > 0 {
            return false;
        }
        if !closing.final_flush_sent && !self.buffer.is_empty() {
            if let Some(closing) = self.closing.as_mut() {
                closing.final_flush_sent = true;
            }
            self.start_flush();
            return false;
        }

        if !self.buffer.is_empty() {
            error!(
                "💀 closing with {} docs still buffered, they will not be written",
                self.buffer.len()
            );
        }
        for waiter in self
            .flush_waiters
            .drain(..)
            .chain(self.deferred_flush_waiters.drain(..))
        {
            let _ = waiter.send(FlushOutcome::Empty);
        }
        let stats = self.stats_snapshot();
        if let Some(reply) = self.closing.as_mut().and_then(|closing| closing.reply.take()) {
            let _ = reply.send(stats);
        }
        true
    }

    fn stats_snapshot(&self) -> WriterStats {
        WriterStats {
            buffered: self.buffer.len(),
            running: self.running,
            connection: self.connection,
            ..self.stats.clone()
        }
    }
}

impl Worker for WriterWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}
