//! Call history command-line tool
//!
//! Lists, searches and erases the call history stored on disk by an rvoip
//! client.
//!
//! ```text
//! rvoip-callhistory --root ~/.rvoip/history last --count 20
//! rvoip-callhistory --root ~/.rvoip/history peer sip:alice@example.com
//! rvoip-callhistory --root ~/.rvoip/history search alice example --json
//! rvoip-callhistory --root ~/.rvoip/history period --from 2024-03-01T00:00:00Z --to 2024-04-01T00:00:00Z
//! rvoip-callhistory --root ~/.rvoip/history erase --yes
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rvoip_call_history::{
    setup_logging, CallHistoryConfig, CallHistoryProgressEvent, CallHistorySearchProgressListener,
    CallHistoryService, CallRecord, SourceContact,
};
use rvoip_history_store::{HistoryStoreConfig, StorageKind};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "rvoip-callhistory")]
#[command(about = "Inspect the call history of an rvoip client")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RVOIP_CALLHISTORY_CONFIG")]
    config: Option<PathBuf>,

    /// History root directory; overrides the configured store
    #[arg(short, long, env = "RVOIP_CALLHISTORY_ROOT")]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "RVOIP_CALLHISTORY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print calls as JSON instead of one label per line
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Most recent calls
    Last {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Most recent calls with a peer
    Peer {
        address: String,
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Calls whose peer addresses contain every keyword
    Search {
        #[arg(required = true)]
        keywords: Vec<String>,
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Calls recorded between two RFC 3339 instants
    Period {
        #[arg(long, value_parser = parse_instant)]
        from: DateTime<Utc>,
        #[arg(long, value_parser = parse_instant)]
        to: DateTime<Utc>,
    },
    /// Delete the whole call history
    Erase {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time such as 2024-03-01T00:00:00Z: {e}"))
}

/// Reports search progress on stderr at debug level
struct ProgressLogger;

impl CallHistorySearchProgressListener for ProgressLogger {
    fn progress_changed(&self, event: &CallHistoryProgressEvent) {
        debug!(progress = event.progress, "Searching call history");
    }
}

fn load_config(args: &Args) -> Result<CallHistoryConfig> {
    let mut config = match &args.config {
        Some(path) => CallHistoryConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CallHistoryConfig::default(),
    };

    if let Some(root) = &args.root {
        config.store = HistoryStoreConfig::on_disk(root)
            .with_max_records_per_file(config.store.max_records_per_file);
    }
    if config.store.storage != StorageKind::File {
        bail!("No on-disk history configured; pass --root or a config file with a file store");
    }

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json && config.logging.json {
        // stdout carries the JSON call list
        config.logging.json = false;
    }
    config.validate()?;
    Ok(config)
}

fn print_calls(calls: Vec<CallRecord>, json: bool) -> Result<()> {
    if json {
        let contacts: Vec<SourceContact> = calls.into_iter().map(SourceContact::from_record).collect();
        println!("{}", serde_json::to_string_pretty(&contacts)?);
    } else {
        for call in calls {
            println!("{}", SourceContact::from_record(call).label);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    setup_logging(&config.logging)?;

    let service = CallHistoryService::from_config(config)?;
    service.add_search_progress_listener(Arc::new(ProgressLogger));

    match args.command {
        Command::Last { count } => print_calls(service.find_last(count).await, args.json)?,
        Command::Peer { ref address, count } => {
            print_calls(service.find_by_peer(address, count).await, args.json)?
        }
        Command::Search {
            ref keywords,
            case_sensitive,
        } => print_calls(service.find_by_keywords(keywords, case_sensitive).await, args.json)?,
        Command::Period { from, to } => {
            if to <= from {
                bail!("--to must be after --from");
            }
            print_calls(service.find_by_period(from, to).await, args.json)?
        }
        Command::Erase { yes } => {
            if !yes {
                bail!("Refusing to erase the call history without --yes");
            }
            service.erase_locally_stored_history().await?;
            info!("Call history erased");
            println!("Call history erased");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from([
            "rvoip-callhistory",
            "--root",
            "/tmp/history",
            "search",
            "alice",
            "example",
            "--case-sensitive",
        ])
        .unwrap();

        match args.command {
            Command::Search {
                keywords,
                case_sensitive,
            } => {
                assert_eq!(keywords, vec!["alice", "example"]);
                assert!(case_sensitive);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_period_requires_rfc3339() {
        assert!(Args::try_parse_from(["rvoip-callhistory", "period", "--from", "yesterday", "--to", "2024-03-01T00:00:00Z"]).is_err());
        let args = Args::try_parse_from([
            "rvoip-callhistory",
            "period",
            "--from",
            "2024-03-01T00:00:00+01:00",
            "--to",
            "2024-03-02T00:00:00Z",
        ])
        .unwrap();
        match args.command {
            Command::Period { from, .. } => assert_eq!(from.to_rfc3339(), "2024-02-29T23:00:00+00:00"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_root_overrides_memory_store() {
        let args = Args::try_parse_from(["rvoip-callhistory", "--root", "/tmp/history", "last"]).unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.store.storage, StorageKind::File);
        assert_eq!(config.store.root_dir, PathBuf::from("/tmp/history"));

        let args = Args::try_parse_from(["rvoip-callhistory", "last"]).unwrap();
        assert!(load_config(&args).is_err());
    }
}
