//! ktycoon - Kyoto Tycoon replication follower
//!
//! Connects to a server as a replication consumer and prints every log entry
//! until interrupted.

use chrono::{DateTime, SecondsFormat};
use clap::Parser;
use ktycoon_client::{ConnectionConfig, LogEntry, ReplicationConsumer};
use ktycoon_protocol::{DEFAULT_PORT, DEFAULT_TIMEOUT_SECS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ktycoon")]
#[command(about = "Follow a Kyoto Tycoon server's replication log")]
#[command(version)]
struct Cli {
    /// Server id used to register as a replication consumer
    #[arg(long, env = "KT_SID")]
    sid: u16,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:1978", value_parser = parse_server)]
    server: (String, u16),

    /// Start timestamp in nanoseconds since the epoch (defaults to now)
    #[arg(long)]
    since: Option<u64>,

    /// Socket timeout in seconds (0 blocks forever)
    #[arg(long, env = "KT_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

fn parse_server(value: &str) -> Result<(String, u16), String> {
    match value.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| format!("invalid port in '{}'", value))?;
            Ok((host.to_string(), port))
        }
        None => Ok((value.to_string(), DEFAULT_PORT)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (host, port) = cli.server;
    let config = ConnectionConfig::new(host, port).with_timeout(Duration::from_secs(cli.timeout));

    tracing::info!("Following {} as sid {}", config.addr(), cli.sid);

    let consumer = ReplicationConsumer::new(cli.sid, config);
    let mut stream = consumer.consume(cli.since)?;

    let stopping = Arc::new(AtomicBool::new(false));
    let closer = stream.closer()?;
    {
        let stopping = stopping.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Received shutdown signal, closing stream...");
            stopping.store(true, Ordering::SeqCst);
            if let Err(e) = closer.close() {
                tracing::error!("Failed to close stream: {}", e);
            }
        })?;
    }

    for entry in stream.by_ref() {
        match entry {
            Ok(entry) => println!("{}", format_entry(&entry)),
            Err(e) if stopping.load(Ordering::SeqCst) => {
                tracing::debug!("Stream closed: {}", e);
                break;
            }
            Err(e) => {
                tracing::error!("Replication stream failed: {}", e);
                return Err(e.into());
            }
        }
    }

    tracing::info!("Stopped");
    Ok(())
}

fn format_entry(entry: &LogEntry) -> String {
    let ts = i64::try_from(entry.timestamp)
        .map(|ns| DateTime::from_timestamp_nanos(ns).to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_else(|_| entry.timestamp.to_string());

    let mut line = format!(
        "{} sid={} db={} {}",
        ts, entry.sid, entry.db, entry.operation
    );
    if let Some(key) = &entry.key {
        line.push_str(&format!(" key={}", key.escape_ascii()));
    }
    if let Some(value) = &entry.value {
        line.push_str(&format!(" value={}", value.escape_ascii()));
    }
    if let Some(expire) = entry.expire {
        line.push_str(&format!(" xt={}", expire));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server() {
        assert_eq!(
            parse_server("kt.local:11978").unwrap(),
            ("kt.local".to_string(), 11978)
        );
        assert_eq!(
            parse_server("kt.local").unwrap(),
            ("kt.local".to_string(), DEFAULT_PORT)
        );
        assert!(parse_server("kt.local:x").is_err());
    }

    #[test]
    fn test_format_entry() {
        let entry = LogEntry {
            timestamp: 0,
            sid: 7,
            db: 1,
            operation: ktycoon_client::LogOperation::Remove,
            key: Some(b"k\x01".to_vec().into()),
            value: None,
            expire: None,
        };
        assert_eq!(
            format_entry(&entry),
            "1970-01-01T00:00:00.000000Z sid=7 db=1 remove key=k\\x01"
        );
    }
}
