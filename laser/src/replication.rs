//! ReplicationTransport (C7): point-to-point bulk transfer of a
//! partition's on-disk files from leader to follower.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Payload for the follower-to-leader `replicate_wdt` RPC (spec §6.1):
/// "come pull the current base data for this partition from `connect_url`".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateWdtRequest {
    pub connect_url: String,
    pub db_hash: i64,
    pub version: String,
    pub node_hash: i64,
}

/// Outcome handed to the receiver's completion callback:
/// `(namespace, ident, error)`.
#[derive(Debug)]
pub struct Completion {
    pub namespace: String,
    pub ident: String,
    pub error: Option<String>,
}

/// Receiver side: allocates a connect URL bound to a destination
/// directory, accepts one incoming transfer, and reports completion.
pub struct Receiver {
    listener: TcpListener,
    connect_url: String,
    dest_dir: PathBuf,
}

impl Receiver {
    /// Bind a fresh listener for `dest_dir`. Any previous partial tree at
    /// that path is removed first.
    pub async fn bind(dest_dir: impl Into<PathBuf>, advertise_host: &str) -> io::Result<Self> {
        let dest_dir = dest_dir.into();
        if dest_dir.exists() {
            fs::remove_dir_all(&dest_dir).await?;
        }
        fs::create_dir_all(&dest_dir).await?;

        let listener = TcpListener::bind((advertise_host, 0)).await?;
        let port = listener.local_addr()?.port();
        let connect_url = format!("{advertise_host}:{port}");

        Ok(Self {
            listener,
            connect_url,
            dest_dir,
        })
    }

    pub fn connect_url(&self) -> &str {
        &self.connect_url
    }

    /// Accept one transfer and write every received file under
    /// `dest_dir`, honoring `timeout` (`max_server_wait_time_ms +
    /// abort_timeout_ms`).
    pub async fn receive(self, namespace: &str, ident: &str, timeout: Duration) -> Completion {
        let result = tokio::time::timeout(timeout, self.receive_inner()).await;

        match result {
            Ok(Ok(())) => Completion {
                namespace: namespace.to_string(),
                ident: ident.to_string(),
                error: None,
            },
            Ok(Err(err)) => Completion {
                namespace: namespace.to_string(),
                ident: ident.to_string(),
                error: Some(err.to_string()),
            },
            Err(_) => Completion {
                namespace: namespace.to_string(),
                ident: ident.to_string(),
                error: Some("timed out waiting for sender".to_string()),
            },
        }
    }

    async fn receive_inner(self) -> io::Result<()> {
        let (mut stream, _) = self.listener.accept().await?;
        loop {
            let mut path_len_buf = [0u8; 4];
            if stream.read_exact(&mut path_len_buf).await.is_err() {
                break;
            }
            let path_len = u32::from_be_bytes(path_len_buf);
            if path_len == 0 {
                break; // end-of-transfer marker
            }

            let mut path_buf = vec![0u8; path_len as usize];
            stream.read_exact(&mut path_buf).await?;
            let relative_path = String::from_utf8_lossy(&path_buf).into_owned();

            let mut len_buf = [0u8; 8];
            stream.read_exact(&mut len_buf).await?;
            let len = u64::from_be_bytes(len_buf);

            let mut content = vec![0u8; len as usize];
            stream.read_exact(&mut content).await?;

            let dest = self.dest_dir.join(relative_path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(dest, content).await?;
        }
        Ok(())
    }
}

/// Sender side: connects to a receiver's `connect_url` and streams every
/// file under `source_dir`. Aborts are idempotent: calling `send` again
/// after a failed attempt is always safe.
pub async fn send(connect_url: &str, source_dir: &Path, timeout: Duration) -> io::Result<()> {
    tokio::time::timeout(timeout, send_inner(connect_url, source_dir))
        .await
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out")))
}

async fn send_inner(connect_url: &str, source_dir: &Path) -> io::Result<()> {
    let mut stream = TcpStream::connect(connect_url).await?;
    let mut entries = Vec::new();
    collect_files(source_dir, source_dir, &mut entries).await?;

    for (relative, absolute) in &entries {
        let content = fs::read(absolute).await?;
        let path_bytes = relative.as_bytes();

        stream.write_all(&(path_bytes.len() as u32).to_be_bytes()).await?;
        stream.write_all(path_bytes).await?;
        stream.write_all(&(content.len() as u64).to_be_bytes()).await?;
        stream.write_all(&content).await?;
    }

    // End-of-transfer marker: a zero-length path.
    stream.write_all(&0u32.to_be_bytes()).await?;
    info!(connect_url, files = entries.len(), "replication send complete");
    Ok(())
}

async fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> io::Result<()> {
    let mut read_dir = fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            Box::pin(collect_files(root, &path, out)).await?;
        } else {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            out.push((relative, path));
        }
    }
    Ok(())
}

pub fn log_abort(connect_url: &str, reason: &str) {
    warn!(connect_url, reason, "replication transfer aborted");
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_a_directory_of_files() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.sst"), b"aaaa").unwrap();
        std::fs::create_dir(source.path().join("nested")).unwrap();
        std::fs::write(source.path().join("nested/b.sst"), b"bbbb").unwrap();

        let dest = tempdir().unwrap();
        let receiver = Receiver::bind(dest.path().join("data"), "127.0.0.1")
            .await
            .unwrap();
        let connect_url = receiver.connect_url().to_string();

        let receive_handle = tokio::spawn(async move {
            receiver.receive("db", "v1", Duration::from_secs(5)).await
        });

        send(&connect_url, source.path(), Duration::from_secs(5))
            .await
            .unwrap();

        let completion = receive_handle.await.unwrap();
        assert!(completion.error.is_none());

        let received = std::fs::read(dest.path().join("data").join("a.sst")).unwrap();
        assert_eq!(received, b"aaaa");
        let nested = std::fs::read(dest.path().join("data").join("nested/b.sst")).unwrap();
        assert_eq!(nested, b"bbbb");
    }

    #[tokio::test]
    async fn receive_times_out_without_a_sender() {
        let dest = tempdir().unwrap();
        let receiver = Receiver::bind(dest.path().join("data"), "127.0.0.1")
            .await
            .unwrap();
        let completion = receiver
            .receive("db", "v1", Duration::from_millis(50))
            .await;
        assert!(completion.error.is_some());
    }
}
