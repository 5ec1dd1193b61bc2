use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use relive_engine::LifecycleManager;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{DaemonRequest, DaemonResponse};

/// Unix-socket daemon exposing the replay engine over line-delimited
/// JSON. One request per line, one response per line; a `watch` request
/// turns the connection into a one-way event stream.
pub struct Daemon {
    engine: Arc<LifecycleManager>,
    listener: UnixListener,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
    pub fn bind(engine: Arc<LifecycleManager>, socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path).with_context(|| {
                format!("Failed to remove existing socket: {}", socket_path.display())
            })?;
        }
        if let Some(parent) = socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create socket directory: {}", parent.display())
                })?;
            }
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind daemon socket: {}", socket_path.display()))?;
        info!(
            target: "relive.daemon",
            socket = %socket_path.display(),
            "daemon listening"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            engine,
            listener,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!(target: "relive.daemon", "shutdown requested via message");
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    info!(target: "relive.daemon", "received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!(target: "relive.daemon", "received SIGINT, shutting down");
                    break;
                }
                accept = self.listener.accept() => {
                    let (stream, _) = accept.context("Daemon accept failed")?;
                    let engine = Arc::clone(&self.engine);
                    let shutdown_tx = self.shutdown_tx.clone();
                    let shutdown_rx = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_client(stream, engine, shutdown_tx, shutdown_rx).await {
                            warn!(target: "relive.daemon", error = %err, "daemon connection error");
                        }
                    });
                }
            }
        }

        if let Err(err) = self.engine.close().await {
            warn!(target: "relive.daemon", error = %err, "error closing context on shutdown");
        }
        Ok(())
    }
}

async fn handle_client(
    stream: tokio::net::UnixStream,
    engine: Arc<LifecycleManager>,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .await
            .context("Failed reading daemon request")?;
        if bytes == 0 {
            break;
        }

        let request = match serde_json::from_str::<DaemonRequest>(line.trim_end()) {
            Ok(request) => request,
            Err(err) => {
                let response = DaemonResponse::Error {
                    code: "invalid_request".to_string(),
                    message: err.to_string(),
                };
                write_response(&mut write_half, &response).await?;
                continue;
            }
        };

        if matches!(request, DaemonRequest::Watch) {
            debug!(target: "relive.daemon", "connection switched to event streaming");
            stream_events(&mut write_half, &engine, &mut shutdown_rx).await;
            break;
        }

        let response = handle_request(&engine, &shutdown_tx, request).await;
        write_response(&mut write_half, &response).await?;
    }

    Ok(())
}

/// Forwards lifecycle events to the client until it hangs up or the
/// daemon shuts down.
async fn stream_events(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    engine: &LifecycleManager,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut events = engine.subscribe();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = shutdown_rx.changed() => return,
        };
        let Some(event) = event else { return };
        let response = DaemonResponse::Event {
            event: event.into(),
        };
        if write_response(writer, &response).await.is_err() {
            return;
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &DaemonResponse) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let payload = serde_json::to_string(response).context("Failed to serialize response")?;
    writer
        .write_all(format!("{payload}\n").as_bytes())
        .await
        .context("Failed writing daemon response")?;
    writer
        .flush()
        .await
        .context("Failed flushing daemon response")?;
    Ok(())
}

async fn handle_request(
    engine: &Arc<LifecycleManager>,
    shutdown_tx: &watch::Sender<bool>,
    request: DaemonRequest,
) -> DaemonResponse {
    match request {
        DaemonRequest::Ping => DaemonResponse::Pong,
        DaemonRequest::Open { credential } => match engine.open(credential).await {
            Ok(()) => DaemonResponse::Ok,
            Err(err) => DaemonResponse::Error {
                code: "open_failed".to_string(),
                message: err.to_string(),
            },
        },
        DaemonRequest::Close => match engine.close().await {
            Ok(()) => DaemonResponse::Ok,
            Err(err) => DaemonResponse::Error {
                code: "close_failed".to_string(),
                message: err.to_string(),
            },
        },
        DaemonRequest::ToggleDevtools => match engine.toggle_devtools().await {
            Ok(()) => DaemonResponse::Ok,
            Err(err) => DaemonResponse::Error {
                code: "devtools_failed".to_string(),
                message: err.to_string(),
            },
        },
        DaemonRequest::Status => DaemonResponse::Status {
            status: engine.status(),
        },
        DaemonRequest::Shutdown => {
            let _ = shutdown_tx.send(true);
            DaemonResponse::Ok
        }
        // Handled by the connection loop before reaching here.
        DaemonRequest::Watch => DaemonResponse::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relive_engine::testing::MockDriver;
    use relive_engine::EngineConfig;
    use tokio::net::UnixStream;

    fn test_engine() -> Arc<LifecycleManager> {
        let driver = Arc::new(MockDriver::new());
        driver.auto_finish_loads();
        LifecycleManager::new(driver, EngineConfig::default(), None)
    }

    async fn roundtrip(socket: &Path, request: &DaemonRequest) -> DaemonResponse {
        let stream = UnixStream::connect(socket).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let payload = serde_json::to_string(request).unwrap();
        write_half
            .write_all(format!("{payload}\n").as_bytes())
            .await
            .unwrap();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim_end()).unwrap()
    }

    #[tokio::test]
    async fn ping_status_and_shutdown_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("relive.sock");
        let daemon = Daemon::bind(test_engine(), &socket).unwrap();
        let server = tokio::spawn(daemon.run());

        assert!(matches!(
            roundtrip(&socket, &DaemonRequest::Ping).await,
            DaemonResponse::Pong
        ));
        match roundtrip(&socket, &DaemonRequest::Status).await {
            DaemonResponse::Status { status } => {
                assert_eq!(status.partition, None);
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(matches!(
            roundtrip(&socket, &DaemonRequest::Shutdown).await,
            DaemonResponse::Ok
        ));
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_requests_get_an_error_response() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("relive.sock");
        let daemon = Daemon::bind(test_engine(), &socket).unwrap();
        let server = tokio::spawn(daemon.run());

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"not json\n").await.unwrap();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: DaemonResponse = serde_json::from_str(line.trim_end()).unwrap();
        assert!(matches!(response, DaemonResponse::Error { code, .. } if code == "invalid_request"));

        let _ = roundtrip(&socket, &DaemonRequest::Shutdown).await;
        server.await.unwrap().unwrap();
    }
}
