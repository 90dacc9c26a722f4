//! 🔧 App Configuration: TOML and env vars in, one `AppConfig` out.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ClientConfig;
use crate::feed::FeedConfig;
use crate::writer::WriterConfig;

/// 📦 Everything the app needs to know about itself.
///
/// ```toml
/// [client.Elasticsearch]
/// url = "http://localhost:9200"
///
/// [writer]
/// interval_ms = 5000
/// buffering = true
/// buffer_limit = 10000
///
/// [feed]
/// file_name = "docs.ndjson"
/// index = "logs"
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Which store to write to.
    pub client: ClientConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    /// 📂 Where the documents come from. Optional, the CLI can override the file.
    #[serde(default)]
    pub feed: Option<FeedConfig>,
}

/// 🚀 Load the config from `BKW_*` env vars, plus a TOML file when one is given.
///
/// 📐 Nested keys in env vars use a double underscore:
/// `BKW_WRITER__INTERVAL_MS=1000` lands on `writer.interval_ms`.
/// When both sources set the same key, the TOML file wins.
///
/// 💀 Returns an error if the merged config does not parse, with a message that
/// names where we looked.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BKW_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BKW_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BKW_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .writer
        .validate()
        .context("💀 The [writer] section parsed, but it doesn't make sense")?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ActiveShards;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_test_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write the temp config.");
        file
    }

    #[test]
    fn the_one_where_every_knob_finds_its_socket() -> anyhow::Result<()> {
        let file = write_test_config(
            r#"
            [client.Elasticsearch]
            url = "http://localhost:9200"
            api_key = "c2VjcmV0"
            gzip = true

            [writer]
            interval = 2000
            buffering = true
            buffer_limit = 500
            pipeline = "geoip"
            wait_for_active_shards = "all"

            [writer.retry]
            min_delay_ms = 250
            max_attempts = 10

            [feed]
            file_name = "docs.ndjson"
            index = "logs"
            "#,
        );

        let app_config = load_config(Some(file.path()))?;

        match &app_config.client {
            ClientConfig::Elasticsearch(es) => {
                assert_eq!(es.url, "http://localhost:9200");
                assert_eq!(es.api_key.as_deref(), Some("c2VjcmV0"));
                assert!(es.gzip);
                assert_eq!(es.request_timeout_secs, 30);
            }
            honestly_who_knows => panic!(
                "💀 Expected an Elasticsearch client, serde took us to {honestly_who_knows:?}"
            ),
        }
        assert_eq!(app_config.writer.interval_ms, 2000);
        assert!(app_config.writer.buffering);
        assert_eq!(app_config.writer.buffer_limit, Some(500));
        assert_eq!(app_config.writer.pipeline.as_deref(), Some("geoip"));
        assert_eq!(
            app_config.writer.wait_for_active_shards,
            Some(ActiveShards::Named("all".to_string()))
        );
        assert_eq!(app_config.writer.retry.min_delay_ms, 250);
        assert_eq!(app_config.writer.retry.max_attempts, Some(10));

        let feed = app_config.feed.expect("💀 the [feed] section went missing");
        assert_eq!(feed.file_name, "docs.ndjson");
        assert_eq!(feed.doc_type, "");
        Ok(())
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() -> anyhow::Result<()> {
        let file = write_test_config(
            r#"
            client = "InMemory"
            "#,
        );

        let app_config = load_config(Some(file.path()))?;

        assert!(matches!(app_config.client, ClientConfig::InMemory));
        assert_eq!(app_config.writer, WriterConfig::default());
        assert_eq!(app_config.writer.interval_ms, 5000);
        assert!(!app_config.writer.buffering, "pass-through unless asked otherwise");
        assert!(app_config.feed.is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_a_zero_interval_is_caught_at_the_door() {
        let file = write_test_config(
            r#"
            client = "InMemory"

            [writer]
            interval_ms = 0
            "#,
        );

        let err = load_config(Some(file.path())).expect_err("💀 a zero interval should not load");
        assert!(format!("{err:#}").contains("interval_ms"), "got: {err:#}");
    }

    #[test]
    fn the_one_where_the_client_section_is_not_optional() {
        let file = write_test_config(
            r#"
            [writer]
            buffering = true
            "#,
        );

        let err = load_config(Some(file.path())).expect_err("💀 no client, no config");
        assert!(
            format!("{err:#}").contains("Failed to parse configuration from file"),
            "got: {err:#}"
        );
    }
}
