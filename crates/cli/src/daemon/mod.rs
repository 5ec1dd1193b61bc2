mod protocol;
mod server;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
pub use protocol::{DaemonRequest, DaemonResponse, EventWire};
pub use server::Daemon;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Returns the daemon socket path for the current user.
///
/// Uses `$XDG_RUNTIME_DIR/relive.sock` if available (already
/// user-permissioned), otherwise falls back to `/tmp/relive-{uid}.sock`.
pub fn socket_path(custom: Option<&Path>) -> PathBuf {
    if let Some(path) = custom {
        return path.to_path_buf();
    }
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(xdg_runtime).join("relive.sock");
    }
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/relive-{uid}.sock"))
}

/// Sends one request and reads one response.
pub async fn send_request(socket: &Path, request: DaemonRequest) -> Result<DaemonResponse> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", socket.display()))?;
    let (read_half, mut write_half) = stream.into_split();

    let payload = serde_json::to_string(&request).context("Failed to serialize request")?;
    write_half
        .write_all(format!("{payload}\n").as_bytes())
        .await
        .context("Failed writing daemon request")?;
    write_half.flush().await.context("Failed flushing daemon request")?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let bytes = reader
        .read_line(&mut line)
        .await
        .context("Failed reading daemon response")?;
    if bytes == 0 {
        return Err(anyhow!("daemon closed the connection without responding"));
    }
    serde_json::from_str(line.trim_end()).context("Failed to parse daemon response")
}

/// Switches a connection into watch mode and prints every lifecycle
/// event as one JSON line on stdout, until the daemon goes away or the
/// process is interrupted.
pub async fn watch_events(socket: &Path) -> Result<()> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", socket.display()))?;
    let (read_half, mut write_half) = stream.into_split();

    let payload = serde_json::to_string(&DaemonRequest::Watch)?;
    write_half.write_all(format!("{payload}\n").as_bytes()).await?;
    write_half.flush().await?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = tokio::select! {
            read = reader.read_line(&mut line) => read.context("Failed reading event stream")?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        if bytes == 0 {
            return Ok(());
        }
        match serde_json::from_str::<DaemonResponse>(line.trim_end()) {
            Ok(DaemonResponse::Event { event }) => {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(other) => tracing::debug!(target: "relive.cli", ?other, "non-event on watch stream"),
            Err(err) => tracing::warn!(target: "relive.cli", error = %err, "unparseable event line"),
        }
    }
}
