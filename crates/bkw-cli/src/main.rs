//! 🚀 bkw-cli: the front door, the bouncer, the maitre d' of bkw.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, feeds a file through the bulk writer,
//! and prints what happened as a table. Like a manager, but with receipts. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use bkw::WriterStats;
use bkw::feed::FeedConfig;
use clap::Parser;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bkw-cli")]
#[command(about = "Feed an NDJSON file through a buffered bulk writer")]
struct Args {
    /// TOML config file. Falls back to BKW_* env vars alone when the file is absent.
    #[arg(env = "BKW_CONFIG", default_value = "bkw.toml")]
    config: PathBuf,

    /// NDJSON file to feed, overriding feed.file_name.
    #[arg(long, short)]
    input: Option<String>,

    /// Destination index, overriding feed.index. Required with --input when no [feed] is configured.
    #[arg(long)]
    index: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // 🔒 a missing default file is fine, env vars may carry everything
    let config_file = args.config.as_path();
    let config_file_which_is_validated_to_exist = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the config file exists. Maybe it's a permissions thing, \
         maybe it's a pwd/cwd thing. Use an absolute path to be absolutely certain. \
         Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => None,
    };

    let mut app_config = bkw::app_config::load_config(config_file_which_is_validated_to_exist)
        .context("💀 In bkw-cli, main, we couldn't load the config. Take a look at the file and the BKW_* env vars, make sure nothing obvious is missing")?;

    app_config.feed = match (app_config.feed.take(), args.input, args.index) {
        (Some(mut feed), input, index) => {
            if let Some(input) = input {
                feed.file_name = input;
            }
            if let Some(index) = index {
                feed.index = index;
            }
            Some(feed)
        }
        (None, Some(file_name), Some(index)) => Some(FeedConfig {
            file_name,
            index,
            doc_type: String::new(),
        }),
        (None, Some(_), None) => {
            anyhow::bail!("💀 --input needs an --index when the config has no [feed] section")
        }
        (None, None, _) => None,
    };

    match bkw::run(app_config).await {
        Ok(stats) => {
            println!("{}", stats_table(&stats));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                    || cause_str.contains("Cannot connect to the store")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the store isn't reachable. \
                    Double-check that Elasticsearch is actually running and that [client] points at it. \
                    If you're using Docker, try `docker ps` to see what's up, \
                    or `docker compose up -d` to resurrect it. ☕"
                );
            }

            std::process::exit(1);
        }
    }
}

/// 📊 Final counters, one per row. The receipt.
fn stats_table(stats: &WriterStats) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["📊 bulk writer", ""]);

    let rows: [(&str, String); 11] = [
        ("accepted", stats.accepted.to_string()),
        ("written", stats.written.to_string()),
        ("item failures", stats.item_failures.to_string()),
        ("dropped", stats.dropped.to_string()),
        ("failed requests", stats.failed_requests.to_string()),
        ("requeued", stats.requeued.to_string()),
        ("discarded on requeue", stats.discarded_on_requeue.to_string()),
        ("flushes", stats.flushes.to_string()),
        ("left in buffer", stats.buffered.to_string()),
        ("connection", format!("{:?}", stats.connection)),
        ("running", stats.running.to_string()),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
