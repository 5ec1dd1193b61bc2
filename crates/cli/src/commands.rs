use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use relive_engine::{EngineConfig, HttpSigner, LifecycleManager, SessionCredential};

use crate::cli::{Cli, Command};
use crate::daemon::{self, Daemon, DaemonRequest, DaemonResponse};
use crate::driver::CdpDriver;

pub async fn dispatch(cli: Cli) -> Result<()> {
    let socket = daemon::socket_path(cli.socket.as_deref());
    match cli.command {
        Command::Serve {
            signer_url,
            data_dir,
            load_timeout,
        } => serve(&socket, signer_url, data_dir, load_timeout).await,
        Command::Open { file } => {
            let credential = read_credential(&file)?;
            expect_ok(daemon::send_request(&socket, DaemonRequest::Open { credential }).await?)
        }
        Command::Close => {
            expect_ok(daemon::send_request(&socket, DaemonRequest::Close).await?)
        }
        Command::Devtools => {
            expect_ok(daemon::send_request(&socket, DaemonRequest::ToggleDevtools).await?)
        }
        Command::Status => {
            match daemon::send_request(&socket, DaemonRequest::Status).await? {
                DaemonResponse::Status { status } => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }
        Command::Watch => daemon::watch_events(&socket).await,
        Command::Ping => match daemon::send_request(&socket, DaemonRequest::Ping).await? {
            DaemonResponse::Pong => {
                println!("daemon is running");
                Ok(())
            }
            other => Err(unexpected(other)),
        },
        Command::Shutdown => {
            expect_ok(daemon::send_request(&socket, DaemonRequest::Shutdown).await?)
        }
    }
}

async fn serve(
    socket: &Path,
    signer_url: Option<String>,
    data_dir: Option<PathBuf>,
    load_timeout: u64,
) -> Result<()> {
    let data_dir = data_dir.unwrap_or_else(|| std::env::temp_dir().join("relive-profiles"));
    let driver = Arc::new(CdpDriver::new(data_dir));

    let signer = match signer_url {
        Some(url) => Some(Arc::new(HttpSigner::new(url).map_err(|e| anyhow!(e))?)
            as Arc<dyn relive_engine::HeaderSigner>),
        None => None,
    };

    let config = EngineConfig {
        load_timeout: Duration::from_secs(load_timeout),
        ..EngineConfig::default()
    };
    let engine = LifecycleManager::new(driver, config, signer);

    Daemon::bind(engine, socket)?.run().await
}

fn read_credential(file: &Path) -> Result<SessionCredential> {
    let raw = if file == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed reading credential from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed reading credential file: {}", file.display()))?
    };
    serde_json::from_str(&raw).context("Failed to parse credential JSON")
}

fn expect_ok(response: DaemonResponse) -> Result<()> {
    match response {
        DaemonResponse::Ok => Ok(()),
        DaemonResponse::Error { code, message } => bail!("daemon error {code}: {message}"),
        other => Err(unexpected(other)),
    }
}

fn unexpected(response: DaemonResponse) -> anyhow::Error {
    anyhow!("unexpected daemon response: {response:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_credential_parses_camel_case_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"id":"s1","cookieBlob":"auth=abc","fingerprint":"fp","displayName":"Jo"}}"#
        )
        .unwrap();
        let credential = read_credential(file.path()).unwrap();
        assert_eq!(credential.id, "s1");
        assert_eq!(credential.display_name, "Jo");
    }

    #[test]
    fn read_credential_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "nope").unwrap();
        assert!(read_credential(file.path()).is_err());
    }
}
