//! 🚚 bkw: a buffered bulk writer for search stores.
//!
//! Documents go in through `BulkWriter::append`, come out as periodic bulk
//! requests, and survive the store going away for a while (up to the buffer
//! limit, anyway). See `writer` for the engine, `backends` for the stores it
//! can talk to, and `run` for the whole thing wired to a config file.
//! 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod error;
pub mod feed;
pub mod retry;
pub mod writer;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::ClientBackend;
use crate::feed::NdjsonFeed;

pub use crate::common::BufferedDoc;
pub use crate::error::WriterError;
pub use crate::writer::{BulkWriter, FlushOutcome, WriterConfig, WriterStats};

/// 🚀 Build the client, start the writer, feed it the configured file, close it.
///
/// Returns the writer's final counters. The writer is closed even when the feed
/// breaks halfway; the feed error is returned after the close.
pub async fn run(app_config: AppConfig) -> Result<WriterStats> {
    let feed_config = app_config.feed.context(
        "💀 No [feed] configured. The writer is ready, but nobody told it what to write.",
    )?;

    let client = ClientBackend::from_config(&app_config.client)
        .context("💀 Failed to build the store client from [client]")?;
    let writer = BulkWriter::new(client, app_config.writer)?;

    writer
        .start()
        .await
        .context("💀 The store never answered the health check")?;
    info!("🚀 writer is up, feeding '{}'", feed_config.file_name);

    let fed = match NdjsonFeed::open(feed_config).await {
        Ok(feed) => feed.pump_into(&writer).await,
        Err(err) => Err(err),
    };
    let stats = writer
        .close()
        .await
        .context("💀 The writer fell over while closing")?;
    let fed = fed?;
    info!("🏁 done: {} docs fed, {} written", fed, stats.written);
    Ok(stats)
}
