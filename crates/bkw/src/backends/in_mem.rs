//! # Previously, on bkw...
//!
//! 🎬 The cluster was a lie. It lived entirely in RAM, gone the moment you blink.
//! It never had a network partition. It only pretended to, when asked nicely.
//!
//! `InMemoryClient` is a store that keeps every batch it accepts behind an
//! `Arc<Mutex<...>>` so callers can inspect what arrived, and that can be told to
//! misbehave on cue: fail the next N pings, fail the next N bulks, reject items
//! bound for a given index, or take its sweet time answering.
//!
//! ⚠️ This is for tests and dry runs. If you're deploying this to prod as your
//! search cluster, please also deploy a therapist.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::BulkClient;
use crate::common::{BufferedDoc, BulkItem, BulkItemOutcome, BulkRequest, BulkResponse};

#[derive(Debug, Default)]
struct InMemoryState {
    /// ✅ docs from every request that succeeded, one Vec per request
    accepted: Vec<Vec<BufferedDoc>>,
    /// 📋 every bulk request ever attempted, successful or not
    requests: Vec<BulkRequest>,
    pings: usize,
    failing_pings: usize,
    failing_bulks: usize,
    rejected_index: Option<String>,
    bulk_latency: Option<Duration>,
}

/// 📦 A store that never forgets and occasionally lies about being down.
///
/// Clone-able because tests hand one copy to the writer and keep another to peek.
/// The `Arc` means everyone shares the same state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClient {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 💀 The next `count` pings fail.
    pub async fn fail_next_pings(&self, count: usize) {
        self.state.lock().await.failing_pings = count;
    }

    /// 💀 The next `count` bulk requests fail as a whole.
    pub async fn fail_next_bulks(&self, count: usize) {
        self.state.lock().await.failing_bulks = count;
    }

    /// 🚫 Items bound for `index` come back with a per-item error.
    pub async fn reject_items_in(&self, index: impl Into<String>) {
        self.state.lock().await.rejected_index = Some(index.into());
    }

    /// 🐌 Every bulk request takes this long before answering.
    pub async fn set_bulk_latency(&self, latency: Duration) {
        self.state.lock().await.bulk_latency = Some(latency);
    }

    /// ✅ Batches the store accepted, in arrival order.
    pub async fn accepted_batches(&self) -> Vec<Vec<BufferedDoc>> {
        self.state.lock().await.accepted.clone()
    }

    /// 📋 Every bulk request attempted, failures included.
    pub async fn requests(&self) -> Vec<BulkRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn pings(&self) -> usize {
        self.state.lock().await.pings
    }
}

#[async_trait]
impl BulkClient for InMemoryClient {
    async fn ping(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pings += 1;
        if state.failing_pings > 0 {
            state.failing_pings -= 1;
            anyhow::bail!("💀 in-memory store is pretending to be unreachable");
        }
        Ok(())
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        // 🐌 sleep outside the lock, so pings and peeks aren't stuck behind a slow write
        let latency = self.state.lock().await.bulk_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        state.requests.push(request.clone());
        if state.failing_bulks > 0 {
            state.failing_bulks -= 1;
            anyhow::bail!("💀 in-memory store dropped the bulk request on the floor");
        }
        state.accepted.push(request.docs().to_vec());

        let Some(rejected) = state.rejected_index.clone() else {
            return Ok(BulkResponse::all_ok(request.docs()));
        };
        let items: Vec<BulkItem> = request
            .docs()
            .iter()
            .map(|doc| {
                let rejected_here = doc.index == rejected;
                BulkItem {
                    index: Some(BulkItemOutcome {
                        index: Some(doc.index.clone()),
                        id: None,
                        status: if rejected_here { 400 } else { 201 },
                        error: rejected_here.then(|| {
                            serde_json::json!({
                                "type": "mapper_parsing_exception",
                                "reason": "the in-memory store took one look and said no"
                            })
                        }),
                    }),
                }
            })
            .collect();
        let errors = items
            .iter()
            .any(|item| item.index.as_ref().is_some_and(|outcome| outcome.error.is_some()));
        Ok(BulkResponse { errors, items })
    }
}
