use std::time::Duration;

use anyhow::{Context, Result};
use guard_proto::telemetry;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Replays recorded sensor lines into a running link at a fixed rate, the way
/// the sensor board streams them. Loops over the file unless `once` is set.
pub async fn replay(addr: &str, path: &str, interval: Duration, once: bool) -> Result<u64> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read feed file {}", path))?;
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    anyhow::ensure!(!lines.is_empty(), "feed file {} has no lines", path);

    // valid lines go out in canonical wire form, the rest verbatim
    let mut invalid = 0;
    let wire: Vec<String> = lines
        .iter()
        .map(|l| match telemetry::parse(l, std::time::Instant::now()) {
            Ok(rec) => telemetry::format_line(rec.bottom_distance_cm, rec.front_distance_cm),
            Err(_) => {
                invalid += 1;
                format!("{}\n", l)
            }
        })
        .collect();
    if invalid > 0 {
        warn!("feed: {} of {} lines are malformed and will be sent as-is", invalid, wire.len());
    }

    let mut stream = TcpStream::connect(addr).await.with_context(|| format!("connect {}", addr))?;
    info!("feed: streaming {} lines to {}", wire.len(), addr);

    let mut tick = tokio::time::interval(interval);
    let mut sent = 0u64;
    loop {
        for line in &wire {
            tick.tick().await;
            stream.write_all(line.as_bytes()).await.context("feed write")?;
            sent += 1;
        }
        if once {
            break;
        }
    }
    stream.shutdown().await.ok();
    Ok(sent)
}
