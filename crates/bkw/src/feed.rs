//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A lone process had been tasked with reading
//! a file. Just a file, they said. What could go wrong?
//!
//! Line 40,118 was not JSON. It was half of a stack trace someone pasted in.
//!
//! `NdjsonFeed` reads one JSON document per line and hands each one to the
//! writer, all bound for the same index. Blank lines are skipped. A line that
//! doesn't parse stops the feed with the file name and line number attached,
//! so you know exactly where to point the blame.
//!
//! 🚰 file → BufReader → serde_json::Value → BulkWriter::append
//! 🦆

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::common::BufferedDoc;
use crate::writer::BulkWriter;

/// 📂 Where the docs come from and where they should land.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedConfig {
    pub file_name: String,
    /// 🎯 Destination index for every doc in the file.
    pub index: String,
    /// Legacy mapping type. Empty means `_type` is left off the action line.
    #[serde(default)]
    pub doc_type: String,
}

pub struct NdjsonFeed {
    lines: tokio::io::Lines<BufReader<File>>,
    config: FeedConfig,
    line_number: usize,
}

impl std::fmt::Debug for NdjsonFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonFeed")
            .field("config", &self.config)
            .field("line_number", &self.line_number)
            .finish()
    }
}

impl NdjsonFeed {
    /// 🚪 Open the file. If it's not there, the error says where we looked.
    pub async fn open(config: FeedConfig) -> Result<Self> {
        let file = File::open(&config.file_name).await.with_context(|| {
            format!(
                "💀 The door to '{}' would not budge. It might not exist, or the permissions \
                 might be wrong. Either way, the feed has nothing to read.",
                config.file_name
            )
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            config,
            line_number: 0,
        })
    }

    /// 📖 The next document, or `None` at end of file.
    pub async fn next_doc(&mut self) -> Result<Option<BufferedDoc>> {
        loop {
            let Some(line) = self.lines.next_line().await.with_context(|| {
                format!(
                    "💀 Reading '{}' failed after line {}",
                    self.config.file_name, self.line_number
                )
            })?
            else {
                return Ok(None);
            };
            self.line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let payload: serde_json::Value = serde_json::from_str(line).with_context(|| {
                format!(
                    "💀 Line {} of '{}' is not JSON. It had one job.",
                    self.line_number, self.config.file_name
                )
            })?;
            return Ok(Some(BufferedDoc::new(
                self.config.index.clone(),
                self.config.doc_type.clone(),
                payload,
            )));
        }
    }

    /// 🚰 Append every remaining document to `writer`. Returns how many were handed over.
    pub async fn pump_into(mut self, writer: &BulkWriter) -> Result<usize> {
        let mut handed_over = 0usize;
        while let Some(doc) = self.next_doc().await? {
            writer.append(doc.index, doc.doc_type, doc.payload);
            handed_over += 1;
            if handed_over % 10_000 == 0 {
                debug!("📖 {} docs fed from '{}'", handed_over, self.config.file_name);
            }
        }
        info!(
            "✅ fed {} docs from '{}' into index '{}'",
            handed_over, self.config.file_name, self.config.index
        );
        Ok(handed_over)
    }
}
