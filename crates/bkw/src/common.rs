//! 📦 Common data structures: the documents we hold and the bulk requests we build from them.
//!
//! 🎬 COLD OPEN: INT. BUFFER, 3:47 AM
//!
//! A `BufferedDoc` sits in a Vec. It does not know the cluster is down.
//! It does not know it has been requeued twice. It only knows its index,
//! its type, and its payload. Ignorance is bliss. Bliss is O(1).
//!
//! 🧠 Knowledge graph:
//! - `BufferedDoc`: one document plus its destination. Immutable once built.
//! - `BulkRequest`: an owned batch of docs + the knobs every write carries
//!   (pipeline, wait_for_active_shards, timeout). Owns the docs so the writer
//!   can take them back after a failed request.
//! - `BulkResponse` / `BulkItem`: what the store says about each item.
//!
//! 🦆

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 🎯 A single document waiting for its bulk ride.
///
/// `doc_type` is the legacy mapping type. Empty means "don't send `_type` at all",
/// which is what every cluster after 7.x would prefer anyway.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedDoc {
    pub index: String,
    pub doc_type: String,
    pub payload: serde_json::Value,
}

impl BufferedDoc {
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            payload,
        }
    }
}

/// 🔧 `wait_for_active_shards`: either a count or a named value like `"all"`.
///
/// We never interpret it. We just carry it to the store like a sealed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ActiveShards {
    Count(u32),
    Named(String),
}

impl fmt::Display for ActiveShards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveShards::Count(count) => write!(f, "{count}"),
            ActiveShards::Named(name) => f.write_str(name),
        }
    }
}

/// 📎 The `{"index": {...}}` envelope that precedes every payload line.
#[derive(Debug, Serialize)]
struct IndexAction<'a> {
    index: IndexActionMeta<'a>,
}

#[derive(Debug, Serialize)]
struct IndexActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type", skip_serializing_if = "is_blank")]
    doc_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipeline: Option<&'a str>,
}

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}

/// 📡 One bulk write, fully described.
///
/// Holds the documents in buffer order. The body sent over the wire is derived
/// from them on demand, so a failed request can hand the docs back untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    docs: Vec<BufferedDoc>,
    pub pipeline: Option<String>,
    pub wait_for_active_shards: Option<ActiveShards>,
    pub timeout: Duration,
}

impl BulkRequest {
    pub fn new(
        docs: Vec<BufferedDoc>,
        pipeline: Option<String>,
        wait_for_active_shards: Option<ActiveShards>,
        timeout: Duration,
    ) -> Self {
        Self {
            docs,
            pipeline,
            wait_for_active_shards,
            timeout,
        }
    }

    pub fn docs(&self) -> &[BufferedDoc] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// 🔄 Give the docs back. Used after the write settles, win or lose.
    pub fn into_docs(self) -> Vec<BufferedDoc> {
        self.docs
    }

    /// ⏱️ The store-side timeout, formatted the way the bulk API wants it: `5000ms`.
    pub fn timeout_param(&self) -> String {
        format!("{}ms", self.timeout.as_millis())
    }

    /// 🧵 Render the alternating action/payload body as NDJSON, trailing newline included.
    ///
    /// ```text
    /// {"index":{"_index":"logs","_type":"doc","pipeline":"geoip"}}
    /// {"message":"hello"}
    /// ```
    pub fn to_ndjson(&self) -> Result<String> {
        let estimated_size: usize = self.docs.len() * 128;
        let mut body = String::with_capacity(estimated_size);
        for doc in &self.docs {
            let action = IndexAction {
                index: IndexActionMeta {
                    index: &doc.index,
                    doc_type: &doc.doc_type,
                    pipeline: self.pipeline.as_deref(),
                },
            };
            let action_line = serde_json::to_string(&action).context(
                "💀 Failed to serialize bulk action metadata. \
                 The JSON that describes JSON has failed to become JSON.",
            )?;
            let payload_line = serde_json::to_string(&doc.payload).with_context(|| {
                format!(
                    "💀 Failed to serialize a payload bound for index '{}'",
                    doc.index
                )
            })?;
            body.push_str(&action_line);
            body.push('\n');
            body.push_str(&payload_line);
            body.push('\n');
        }
        Ok(body)
    }
}

/// 📬 What the store said about the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkItem>,
}

/// 📬 What the store said about one item. We only ever send `index` actions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkItem {
    #[serde(default)]
    pub index: Option<BulkItemOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BulkItemOutcome {
    #[serde(rename = "_index", default)]
    pub index: Option<String>,
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl BulkResponse {
    /// ✅ A response for a batch where every item landed.
    pub fn all_ok(docs: &[BufferedDoc]) -> Self {
        Self {
            errors: false,
            items: docs
                .iter()
                .map(|doc| BulkItem {
                    index: Some(BulkItemOutcome {
                        index: Some(doc.index.clone()),
                        id: None,
                        status: 201,
                        error: None,
                    }),
                })
                .collect(),
        }
    }

    /// 💀 Items that carry an error, with their position in the batch.
    ///
    /// Only consulted when `errors` is set; a clean response skips the scan.
    pub fn failed_items(&self) -> impl Iterator<Item = (usize, &BulkItemOutcome)> {
        let errors = self.errors;
        self.items
            .iter()
            .enumerate()
            .filter(move |_| errors)
            .filter_map(|(position, item)| {
                item.index
                    .as_ref()
                    .filter(|outcome| outcome.error.is_some())
                    .map(|outcome| (position, outcome))
            })
    }
}
