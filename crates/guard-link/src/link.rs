use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use guard_proto::telemetry;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cell::LatestRecord;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no telemetry line within {0:?}")]
    Timeout(Duration),
    #[error("telemetry peer closed the connection")]
    Closed,
    #[error("telemetry line longer than {0} bytes")]
    Overlong(usize),
    #[error("telemetry read failed: {0}")]
    Io(#[from] io::Error),
}

/// Longest accepted line, terminator excluded. A well-formed record is a few
/// dozen bytes.
pub const MAX_LINE_BYTES: usize = 256;

/// The one sensor-board connection served for the process lifetime.
pub struct TelemetryLink {
    peer: SocketAddr,
    reader: BufReader<TcpStream>,
    // partial line carried across cancelled reads
    buf: Vec<u8>,
    discarding: bool,
}

impl TelemetryLink {
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind telemetry listener {}", addr))
    }

    /// Accepts a single peer and drops the listener; later peers are refused.
    pub async fn accept_once(listener: TcpListener) -> Result<Self> {
        let local = listener.local_addr().ok();
        info!("link: waiting for sensor connection on {:?}", local);
        let (stream, peer) = listener.accept().await.context("accept telemetry peer")?;
        stream.set_nodelay(true).ok();
        info!("link: connection established with {}", peer);
        Ok(Self::from_stream(stream, peer))
    }

    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { peer, reader: BufReader::new(stream), buf: Vec::new(), discarding: false }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next raw line, without its terminator. Partial input stays buffered in
    /// `self`, so a timeout never drops a partially received line.
    ///
    /// A line over [`MAX_LINE_BYTES`] yields `Overlong` once; the rest of it,
    /// up to the next newline, is skipped.
    pub async fn next_line(&mut self, timeout: Duration) -> Result<String, LinkError> {
        match tokio::time::timeout(timeout, self.read_line()).await {
            Err(_) => Err(LinkError::Timeout(timeout)),
            Ok(res) => res,
        }
    }

    async fn read_line(&mut self) -> Result<String, LinkError> {
        loop {
            let room = (MAX_LINE_BYTES + 1 - self.buf.len()) as u64;
            let n = (&mut self.reader).take(room).read_until(b'\n', &mut self.buf).await?;

            if n == 0 {
                // EOF; an unterminated last line is still delivered
                if self.buf.is_empty() || self.discarding {
                    self.buf.clear();
                    return Err(LinkError::Closed);
                }
            } else if self.buf.last() != Some(&b'\n') {
                if self.buf.len() <= MAX_LINE_BYTES {
                    continue;
                }
                self.buf.clear();
                if !self.discarding {
                    self.discarding = true;
                    return Err(LinkError::Overlong(MAX_LINE_BYTES));
                }
                continue;
            }

            let mut raw = std::mem::take(&mut self.buf);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            while matches!(raw.last(), Some(b'\n' | b'\r')) {
                raw.pop();
            }
            return String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into());
        }
    }
}

/// Reader task: parses every line and publishes it into `cell`. Malformed
/// lines are logged and dropped. Ends (marking the cell closed) when the peer
/// disconnects or the socket fails.
pub fn spawn_reader(mut link: TelemetryLink, cell: LatestRecord, read_timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let peer = link.peer();
        loop {
            match link.next_line(read_timeout).await {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let now = tokio::time::Instant::now().into_std();
                    match telemetry::parse(&line, now) {
                        Ok(rec) => {
                            debug!("link: received {}", rec);
                            cell.publish(rec);
                        }
                        Err(e) => warn!("link: discarding line: {}", e),
                    }
                }
                Err(LinkError::Timeout(t)) => debug!("link: no data from {} for {:?}", peer, t),
                Err(LinkError::Overlong(max)) => {
                    warn!("link: discarding line over {} bytes from {}", max, peer);
                }
                Err(LinkError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("link: discarding non-UTF-8 line from {}", peer);
                }
                Err(LinkError::Closed) => {
                    warn!("link: peer {} disconnected; no further telemetry", peer);
                    break;
                }
                Err(e) => {
                    warn!("link: {}; closing", e);
                    break;
                }
            }
        }
        cell.mark_closed();
    })
}

/// Accept the single peer on `listener`, then read from it until it goes away.
pub async fn serve(listener: TcpListener, cell: LatestRecord, read_timeout: Duration) {
    match TelemetryLink::accept_once(listener).await {
        Ok(link) => {
            if let Err(e) = spawn_reader(link, cell.clone(), read_timeout).await {
                warn!("link: reader task failed: {}", e);
                cell.mark_closed();
            }
        }
        Err(e) => {
            warn!("link: {:#}", e);
            cell.mark_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn pair() -> (TelemetryLink, TcpStream) {
        let listener = TelemetryLink::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (link, client) = tokio::join!(TelemetryLink::accept_once(listener), TcpStream::connect(addr));
        (link.unwrap(), client.unwrap())
    }

    #[tokio::test]
    async fn next_line_reports_lines_timeout_and_close() {
        let (mut link, mut client) = pair().await;

        client.write_all(b"S1=10&S2=20\n").await.unwrap();
        let line = link.next_line(Duration::from_secs(2)).await.unwrap();
        assert_eq!(line, "S1=10&S2=20");

        let err = link.next_line(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));

        drop(client);
        let err = link.next_line(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, LinkError::Closed));
    }

    #[tokio::test]
    async fn reader_skips_malformed_and_marks_closed() {
        let (link, mut client) = pair().await;
        let cell = LatestRecord::new();
        let handle = spawn_reader(link, cell.clone(), Duration::from_millis(50));

        client
            .write_all(b"S1=12&S2=34\ngarbage\n\nS1=x&S2=1\nS1=15&S2=44\n")
            .await
            .unwrap();
        drop(client);
        handle.await.unwrap();

        assert_eq!(cell.published(), 2);
        let snap = cell.take();
        assert!(snap.closed);
        let rec = snap.fresh.unwrap();
        assert_eq!(rec.bottom_distance_cm, 15.0);
        assert_eq!(rec.front_distance_cm, 44.0);
    }

    #[tokio::test]
    async fn overlong_line_is_dropped_and_reading_resumes() {
        let (mut link, mut client) = pair().await;

        let mut flood = b"S1=1".to_vec();
        flood.extend(std::iter::repeat(b'9').take(4 * MAX_LINE_BYTES));
        flood.extend_from_slice(b"&S2=2\nS1=15&S2=44\n");
        client.write_all(&flood).await.unwrap();

        let err = link.next_line(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, LinkError::Overlong(MAX_LINE_BYTES)));
        assert_eq!(link.next_line(Duration::from_secs(2)).await.unwrap(), "S1=15&S2=44");

        let exact = format!("{}\n", "x".repeat(MAX_LINE_BYTES));
        client.write_all(exact.as_bytes()).await.unwrap();
        assert_eq!(link.next_line(Duration::from_secs(2)).await.unwrap().len(), MAX_LINE_BYTES);
    }

    #[tokio::test]
    async fn reader_survives_an_overlong_line() {
        let (link, mut client) = pair().await;
        let cell = LatestRecord::new();
        let handle = spawn_reader(link, cell.clone(), Duration::from_millis(50));

        let mut flood = vec![b'7'; 10 * MAX_LINE_BYTES];
        flood.extend_from_slice(b"\nS1=21&S2=33\n");
        client.write_all(&flood).await.unwrap();
        drop(client);
        handle.await.unwrap();

        assert_eq!(cell.published(), 1);
        let rec = cell.take().fresh.unwrap();
        assert_eq!(rec.bottom_distance_cm, 21.0);
    }

    #[tokio::test]
    async fn serve_accepts_a_single_peer() {
        let listener = TelemetryLink::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cell = LatestRecord::new();
        let server = tokio::spawn(serve(listener, cell.clone(), Duration::from_millis(50)));

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"S1=30&S2=31\n").await.unwrap();
        drop(first);
        server.await.unwrap();

        assert!(cell.is_closed());
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
