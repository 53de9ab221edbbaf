use anyhow::{Context, Result};
use guard_proto::audit::AuditEvent;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Appends audit events as JSON lines until every sender is dropped.
pub async fn spawn_writer(path: &str, mut rx: mpsc::Receiver<AuditEvent>) -> Result<JoinHandle<()>> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("open audit trail {}", path))?;
    let path = path.to_string();

    Ok(tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let mut line = match serde_json::to_vec(&ev) {
                Ok(v) => v,
                Err(e) => {
                    warn!("audit: encode failed: {}", e);
                    continue;
                }
            };
            line.push(b'\n');
            if let Err(e) = f.write_all(&line).await {
                warn!("audit: write to {} failed: {}", path, e);
            }
        }
        if let Err(e) = f.flush().await {
            warn!("audit: flush of {} failed: {}", path, e);
        }
    }))
}
