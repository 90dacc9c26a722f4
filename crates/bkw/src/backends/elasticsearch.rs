//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! The monitoring dashboard glows amber. The cluster answers pings again,
//! for now. Somewhere upstream a buffer holds four hundred documents and its
//! breath. This module is the hand that passes them across.
//!
//! 🚀 Two calls, nothing more:
//! - `ping`: `HEAD /`. A 2xx means "I'm here". Anything else means "try later".
//! - `bulk`: `POST /_bulk` with an NDJSON body, the store-side `timeout`, and
//!   `wait_for_active_shards` when configured. Optionally gzipped.
//!
//! 🔄 This module does not retry. Retries are the writer's problem.
//!
//! 🦆

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::BulkClient;
use crate::common::{BulkRequest, BulkResponse};

/// 🔧 Where the cluster lives and how to get past the bouncer.
///
/// 🔒 auth is tri-modal: api_key, username+password, or "I hope anonymous works".
/// api_key wins when both are set. This is not a democracy.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchClientConfig {
    /// 📡 Scheme, host and port. Yes, all of it.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// 🫁 Gzip the bulk body. Saves bandwidth, costs a little CPU.
    #[serde(default)]
    pub gzip: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ Client-side ceiling for any single request. The store-side bulk
    /// timeout comes from the writer's flush interval instead.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ElasticsearchClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            gzip: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 📡 The HTTP muscle. Reused across requests, because building a new
/// `reqwest::Client` per request is buying a new car to go get groceries.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    config: ElasticsearchClientConfig,
}

impl ElasticsearchClient {
    /// 🏗️ Build the client. No network traffic happens here.
    pub fn new(config: ElasticsearchClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a missing TLS cert or a cursed system OpenSSL. Either way: tragic.")?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// 🔒 Same auth dance for every request: api_key beats basic auth in this club.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    fn bulk_url(&self, request: &BulkRequest) -> String {
        let mut url = format!(
            "{}/_bulk?timeout={}",
            self.base_url(),
            request.timeout_param()
        );
        if let Some(ref shards) = request.wait_for_active_shards {
            url.push_str(&format!("&wait_for_active_shards={}", shards));
        }
        url
    }

    fn gzip(body: &str) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::fast());
        encoder
            .write_all(body.as_bytes())
            .context("💀 Failed to squish the bulk body into gzip")?;
        encoder
            .finish()
            .context("💀 Failed to finish the gzip stream. The bytes were squished but not sealed.")
    }
}

#[async_trait]
impl BulkClient for ElasticsearchClient {
    async fn ping(&self) -> Result<()> {
        let url = format!("{}/", self.base_url());
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .with_context(|| format!("💀 Pinged '{}' and got ghosted. The network is giving us the silent treatment.", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "💀 Pinged '{}' and the cluster answered '{}'. Alive, but not willing.",
                url,
                status
            );
        }
        trace!("✅ ping answered with {}", status);
        Ok(())
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        let body = request.to_ndjson()?;
        let url = self.bulk_url(request);
        debug!(
            "📡 Sending {} docs ({} bytes) to /_bulk",
            request.len(),
            body.len()
        );

        // ⚠️ Content-Type: application/x-ndjson, not application/json. VERY important.
        let mut http_request = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/x-ndjson");
        http_request = if self.config.gzip {
            http_request
                .header("Content-Encoding", "gzip")
                .body(Self::gzip(&body)?)
        } else {
            http_request.body(body)
        };

        let response = http_request
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity, check timeouts, and check your feelings.")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The bulk request arrived, but Elasticsearch said '{}'. The body of the response read: '{}'.",
                status,
                body
            );
        }

        let raw = response
            .bytes()
            .await
            .context("💀 The bulk response started arriving and then stopped. Half a reply is no reply.")?;
        let parsed: BulkResponse = serde_json::from_slice(&raw)
            .context("💀 The bulk response was not the JSON we were promised.")?;
        trace!(
            "🚀 Bulk request landed: {} items, errors={}",
            parsed.items.len(),
            parsed.errors
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ActiveShards, BufferedDoc};
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn two_doc_request() -> BulkRequest {
        BulkRequest::new(
            vec![
                BufferedDoc::new("logs", "", json!({"n": 1})),
                BufferedDoc::new("logs", "", json!({"n": 2})),
            ],
            Some("geoip".to_string()),
            Some(ActiveShards::Named("all".to_string())),
            Duration::from_millis(5000),
        )
    }

    #[tokio::test]
    async fn the_one_where_the_cluster_answers_the_door() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ElasticsearchClient::new(ElasticsearchClientConfig::new(server.uri()))?;
        client.ping().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_503_ping_is_not_a_yes() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ElasticsearchClient::new(ElasticsearchClientConfig::new(server.uri()))?;
        assert!(client.ping().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_api_key_outranks_basic_auth() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(header("Authorization", "ApiKey sekrit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ElasticsearchClientConfig::new(server.uri());
        config.username = Some("elastic".to_string());
        config.password = Some("changeme".to_string());
        config.api_key = Some("sekrit".to_string());
        ElasticsearchClient::new(config)?.ping().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bulk_carries_timeout_shards_and_ndjson() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(query_param("timeout", "5000ms"))
            .and(query_param("wait_for_active_shards", "all"))
            .and(header("Content-Type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 1,
                "errors": false,
                "items": [
                    {"index": {"_index": "logs", "status": 201}},
                    {"index": {"_index": "logs", "status": 201}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ElasticsearchClient::new(ElasticsearchClientConfig::new(server.uri()))?;
        let request = two_doc_request();
        let response = client.bulk(&request).await?;
        assert!(!response.errors);
        assert_eq!(response.items.len(), 2);

        let received = server
            .received_requests()
            .await
            .expect("💀 wiremock should be recording requests");
        let body = String::from_utf8(received[0].body.clone())?;
        assert_eq!(body, request.to_ndjson()?);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_item_errors_come_back_inside_ok() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    {"index": {"_index": "logs", "status": 201}},
                    {"index": {"_index": "logs", "status": 400,
                               "error": {"type": "mapper_parsing_exception"}}}
                ]
            })))
            .mount(&server)
            .await;

        let client = ElasticsearchClient::new(ElasticsearchClientConfig::new(server.uri()))?;
        let response = client.bulk(&two_doc_request()).await?;
        assert_eq!(response.failed_items().count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_500_fails_the_whole_request() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(500).set_body_string("shard on fire"))
            .mount(&server)
            .await;

        let client = ElasticsearchClient::new(ElasticsearchClientConfig::new(server.uri()))?;
        let err = client
            .bulk(&two_doc_request())
            .await
            .expect_err("💀 a 500 must be a request-level failure");
        assert!(format!("{err:#}").contains("shard on fire"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_listening_at_all() -> Result<()> {
        let mut config = ElasticsearchClientConfig::new("http://127.0.0.1:1");
        config.connect_timeout_secs = 1;
        let client = ElasticsearchClient::new(config)?;
        assert!(client.ping().await.is_err());
        assert!(client.bulk(&two_doc_request()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_body_gets_squished() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Encoding", "gzip"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ElasticsearchClientConfig::new(server.uri());
        config.gzip = true;
        let client = ElasticsearchClient::new(config)?;
        let request = two_doc_request();
        client.bulk(&request).await?;

        let received = server
            .received_requests()
            .await
            .expect("💀 wiremock should be recording requests");
        let mut unsquished = String::new();
        GzDecoder::new(received[0].body.as_slice()).read_to_string(&mut unsquished)?;
        assert_eq!(unsquished, request.to_ndjson()?);
        Ok(())
    }
}
