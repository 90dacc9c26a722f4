//! 🔌 Backends: the things on the other end of the wire.
//!
//! 🚰 The writer decides *when* and *what*. A backend only knows *how*:
//! answer a ping, swallow a bulk request, report back per item.
//! No buffering, no retries, no opinions. Like a postal worker who delivers
//! the mail without reading it.
//!
//! 🧠 Knowledge graph:
//! - Pattern: `BulkClient` trait → concrete impls (`ElasticsearchClient`,
//!   `InMemoryClient`) → `ClientBackend` enum dispatcher → `from_config` resolver.
//! - `ping`: liveness probe, no side effects.
//! - `bulk`: one request-level outcome (`Err` = the whole call failed) plus
//!   per-item outcomes inside the `Ok`.
//!
//! 🦆

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::common::{BulkRequest, BulkResponse};

pub(crate) mod elasticsearch;
pub(crate) mod in_mem;

pub use elasticsearch::{ElasticsearchClient, ElasticsearchClientConfig};
pub use in_mem::InMemoryClient;

/// 📡 A remote store that can be pinged and bulk-written to.
///
/// # Contract
/// - `ping` returns `Ok(())` when the store is reachable and willing.
/// - `bulk` returns `Err` only when the request as a whole failed (transport,
///   non-2xx, unparseable reply). Item-level failures ride inside `Ok`.
/// - Neither method retries. Retries are the writer's problem.
#[async_trait]
pub trait BulkClient: std::fmt::Debug + Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse>;
}

/// 🔧 Which store to talk to. Externally tagged, so TOML reads as
/// `[client.Elasticsearch]` or `client = "InMemory"`.
#[derive(Debug, Deserialize, Clone)]
pub enum ClientConfig {
    Elasticsearch(ElasticsearchClientConfig),
    InMemory,
}

/// 🎭 The many faces of a store client. The writer never needs to know which one it got.
///
/// Clone is cheap for both arms: reqwest pools behind an Arc, and the in-memory
/// store shares its state behind one too.
#[derive(Debug, Clone)]
pub enum ClientBackend {
    InMemory(InMemoryClient),
    Elasticsearch(ElasticsearchClient),
}

impl ClientBackend {
    /// 🏗️ Resolve a client from config. Does not touch the network; that's the health check's job.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        match config {
            ClientConfig::Elasticsearch(es_config) => Ok(Self::Elasticsearch(
                ElasticsearchClient::new(es_config.clone())?,
            )),
            ClientConfig::InMemory => Ok(Self::InMemory(InMemoryClient::new())),
        }
    }
}

impl From<InMemoryClient> for ClientBackend {
    fn from(client: InMemoryClient) -> Self {
        Self::InMemory(client)
    }
}

impl From<ElasticsearchClient> for ClientBackend {
    fn from(client: ElasticsearchClient) -> Self {
        Self::Elasticsearch(client)
    }
}

#[async_trait]
impl BulkClient for ClientBackend {
    async fn ping(&self) -> Result<()> {
        match self {
            ClientBackend::InMemory(client) => client.ping().await,
            ClientBackend::Elasticsearch(client) => client.ping().await,
        }
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        match self {
            ClientBackend::InMemory(client) => client.bulk(request).await,
            ClientBackend::Elasticsearch(client) => client.bulk(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_in_memory_config_resolves_without_drama() -> Result<()> {
        let backend = ClientBackend::from_config(&ClientConfig::InMemory)?;
        assert!(matches!(backend, ClientBackend::InMemory(_)));
        Ok(())
    }

    #[test]
    fn the_one_where_elasticsearch_config_resolves_without_dialing() -> Result<()> {
        #[derive(Deserialize)]
        struct Wrapper {
            client: ClientConfig,
        }

        // 🔒 nothing listens on this port. from_config must not care.
        let wrapper: Wrapper = toml::from_str(
            r#"
            [client.Elasticsearch]
            url = "http://127.0.0.1:1"
            "#,
        )?;
        let backend = ClientBackend::from_config(&wrapper.client)?;
        assert!(matches!(backend, ClientBackend::Elasticsearch(_)));
        Ok(())
    }
}
