//! Chromium-backed [`BrowserDriver`] over the DevTools protocol.
//!
//! Each partition maps to its own Chromium instance with a dedicated
//! profile directory, which gives the cookie/storage isolation the
//! engine requires. Header rewriting rides on the Fetch domain: every
//! request is paused, pushed through the installed rewriter, and
//! continued with the rewritten header set.
//!
//! Backend limits: the tab is on screen from launch (CDP cannot attach
//! or detach a native view), `show` sizes the viewport and raises the
//! window, and there is no in-page bridge, so the overlay's buttons are
//! inert and `toggle_devtools` reports unsupported.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, HeaderEntry,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieSameSite, GetCookiesParams, SetCookieParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventLoadEventFired, ReloadParams,
};
use chromiumoxide::cdp::browser_protocol::storage::ClearDataForOriginParams;
use chromiumoxide::Page;
use futures::StreamExt;
use relive_engine::driver::{BridgeCommand, BrowserDriver, HeaderRewriter, LoadEvent, Viewport};
use relive_engine::{Cookie, EngineError, SameSite};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Result<T> = relive_engine::Result<T>;

fn driver_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::Driver(err.to_string())
}

struct ContextHandle {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    load_task: JoinHandle<()>,
    fetch_task: Option<JoinHandle<()>>,
    user_data_dir: PathBuf,
}

/// One Chromium per partition, all sharing a base profile directory.
pub struct CdpDriver {
    data_dir: PathBuf,
    contexts: Mutex<HashMap<String, ContextHandle>>,
    load_tx: broadcast::Sender<LoadEvent>,
    bridge_tx: broadcast::Sender<BridgeCommand>,
}

impl CdpDriver {
    pub fn new(data_dir: PathBuf) -> Self {
        let (load_tx, _) = broadcast::channel(64);
        let (bridge_tx, _) = broadcast::channel(16);
        Self {
            data_dir,
            contexts: Mutex::new(HashMap::new()),
            load_tx,
            bridge_tx,
        }
    }

    fn profile_dir(&self, partition: &str) -> PathBuf {
        let safe: String = partition
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        self.data_dir.join(safe)
    }

    async fn page(&self, partition: &str) -> Result<Page> {
        self.contexts
            .lock()
            .await
            .get(partition)
            .map(|handle| handle.page.clone())
            .ok_or_else(|| EngineError::Driver(format!("no context for partition {partition}")))
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn create_context(&self, partition: &str) -> Result<()> {
        let mut contexts = self.contexts.lock().await;
        if contexts.contains_key(partition) {
            debug!(target: "relive.cdp", partition, "context already exists");
            return Ok(());
        }

        let user_data_dir = self.profile_dir(partition);
        std::fs::create_dir_all(&user_data_dir).map_err(driver_err)?;

        let config = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .with_head()
            .build()
            .map_err(driver_err)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(driver_err)?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target: "relive.cdp", error = %err, "cdp handler event error");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(driver_err)?;

        let mut load_events = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(driver_err)?;
        let load_tx = self.load_tx.clone();
        let load_partition = partition.to_string();
        let load_task = tokio::spawn(async move {
            while load_events.next().await.is_some() {
                let _ = load_tx.send(LoadEvent::Finished {
                    partition: load_partition.clone(),
                });
            }
        });

        contexts.insert(
            partition.to_string(),
            ContextHandle {
                browser,
                page,
                handler_task,
                load_task,
                fetch_task: None,
                user_data_dir,
            },
        );
        debug!(target: "relive.cdp", partition, "context created");
        Ok(())
    }

    async fn destroy_context(&self, partition: &str) -> Result<()> {
        let handle = self.contexts.lock().await.remove(partition);
        let Some(mut handle) = handle else {
            return Ok(());
        };
        handle.load_task.abort();
        if let Some(task) = handle.fetch_task.take() {
            task.abort();
        }
        if let Err(err) = handle.browser.close().await {
            warn!(target: "relive.cdp", partition, error = %err, "browser close failed");
        }
        if let Err(err) = handle.browser.wait().await {
            debug!(target: "relive.cdp", partition, error = %err, "browser wait failed");
        }
        handle.handler_task.abort();
        if let Err(err) = std::fs::remove_dir_all(&handle.user_data_dir) {
            warn!(
                target: "relive.cdp",
                partition,
                dir = %handle.user_data_dir.display(),
                error = %err,
                "profile directory removal failed"
            );
        }
        debug!(target: "relive.cdp", partition, "context destroyed");
        Ok(())
    }

    async fn clear_storage(&self, partition: &str) -> Result<()> {
        let Ok(page) = self.page(partition).await else {
            // Already destroyed; nothing left to clear.
            return Ok(());
        };
        page.execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(driver_err)?;
        // Storage-domain clear covers every origin in the partition, not
        // just whatever document the page currently shows.
        let params = ClearDataForOriginParams::builder()
            .origin("*")
            .storage_types("all")
            .build()
            .map_err(driver_err)?;
        if let Err(err) = page.execute(params).await {
            debug!(target: "relive.cdp", partition, error = %err, "storage clear failed");
        }
        Ok(())
    }

    async fn set_cookie(&self, partition: &str, cookie: Cookie) -> Result<()> {
        let page = self.page(partition).await?;
        let mut builder = SetCookieParams::builder()
            .name(cookie.name)
            .value(cookie.value)
            .url(cookie.url);
        if let Some(path) = cookie.path {
            builder = builder.path(path);
        }
        if let Some(expires) = cookie.expires {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
        if let Some(http_only) = cookie.http_only {
            builder = builder.http_only(http_only);
        }
        if let Some(secure) = cookie.secure {
            builder = builder.secure(secure);
        }
        if let Some(same_site) = cookie.same_site {
            builder = builder.same_site(match same_site {
                SameSite::None => CookieSameSite::None,
                SameSite::Lax => CookieSameSite::Lax,
                SameSite::Strict => CookieSameSite::Strict,
            });
        }
        let params = builder.build().map_err(driver_err)?;
        page.execute(params).await.map_err(driver_err)?;
        Ok(())
    }

    /// Reads back a cookie visible to the current document.
    async fn cookie_value(&self, partition: &str, name: &str) -> Result<Option<String>> {
        let page = self.page(partition).await?;
        let response = page
            .execute(GetCookiesParams::default())
            .await
            .map_err(driver_err)?;
        Ok(response
            .result
            .cookies
            .iter()
            .find(|cookie| cookie.name == name)
            .map(|cookie| cookie.value.clone()))
    }

    async fn set_user_agent(&self, partition: &str, user_agent: &str) -> Result<()> {
        let page = self.page(partition).await?;
        let params = SetUserAgentOverrideParams::builder()
            .user_agent(user_agent)
            .build()
            .map_err(driver_err)?;
        page.execute(params).await.map_err(driver_err)?;
        Ok(())
    }

    async fn add_init_script(&self, partition: &str, script: &str) -> Result<()> {
        let page = self.page(partition).await?;
        let params = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(script)
            .build()
            .map_err(driver_err)?;
        page.execute(params).await.map_err(driver_err)?;
        Ok(())
    }

    async fn install_rewriter(
        &self,
        partition: &str,
        rewriter: Arc<dyn HeaderRewriter>,
    ) -> Result<()> {
        let page = self.page(partition).await?;
        page.execute(fetch::EnableParams::default())
            .await
            .map_err(driver_err)?;

        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(driver_err)?;
        let task_page = page.clone();
        let task_partition = partition.to_string();
        let task = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let url = event.request.url.clone();
                let headers = match serde_json::to_value(&event.request.headers) {
                    Ok(serde_json::Value::Object(map)) => map
                        .into_iter()
                        .filter_map(|(name, value)| {
                            value.as_str().map(|v| (name, v.to_string()))
                        })
                        .collect(),
                    _ => Vec::new(),
                };

                let rewritten = rewriter.rewrite(&url, headers).await;
                let entries: Vec<HeaderEntry> = rewritten
                    .into_iter()
                    .map(|(name, value)| HeaderEntry { name, value })
                    .collect();

                let params = match ContinueRequestParams::builder()
                    .request_id(event.request_id.clone())
                    .headers(entries)
                    .build()
                {
                    Ok(params) => params,
                    Err(err) => {
                        warn!(target: "relive.cdp", partition = %task_partition, error = %err, "continue params build failed");
                        continue;
                    }
                };
                if let Err(err) = task_page.execute(params).await {
                    debug!(
                        target: "relive.cdp",
                        partition = %task_partition,
                        error = %err,
                        "request continue failed"
                    );
                }
            }
        });

        let mut contexts = self.contexts.lock().await;
        if let Some(handle) = contexts.get_mut(partition) {
            if let Some(previous) = handle.fetch_task.replace(task) {
                previous.abort();
            }
        } else {
            task.abort();
        }
        Ok(())
    }

    async fn remove_rewriter(&self, partition: &str) -> Result<()> {
        let task = {
            let mut contexts = self.contexts.lock().await;
            contexts
                .get_mut(partition)
                .and_then(|handle| handle.fetch_task.take())
        };
        let Some(task) = task else {
            return Ok(());
        };
        task.abort();
        if let Ok(page) = self.page(partition).await {
            if let Err(err) = page.execute(fetch::DisableParams::default()).await {
                debug!(target: "relive.cdp", partition, error = %err, "fetch disable failed");
            }
        }
        Ok(())
    }

    async fn navigate(&self, partition: &str, url: &str) -> Result<()> {
        let page = self.page(partition).await?;
        page.goto(url).await.map_err(driver_err)?;
        Ok(())
    }

    async fn reload(&self, partition: &str) -> Result<()> {
        let page = self.page(partition).await?;
        page.execute(ReloadParams::default())
            .await
            .map_err(driver_err)?;
        Ok(())
    }

    async fn evaluate(&self, partition: &str, script: &str) -> Result<serde_json::Value> {
        let page = self.page(partition).await?;
        let result = page.evaluate(script).await.map_err(driver_err)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn show(&self, partition: &str, viewport: Viewport) -> Result<()> {
        let page = self.page(partition).await?;
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(driver_err)?;
        page.execute(params).await.map_err(driver_err)?;
        page.bring_to_front().await.map_err(driver_err)?;
        Ok(())
    }

    async fn hide(&self, _partition: &str) -> Result<()> {
        // The window is owned by Chromium; there is no host view to
        // detach from. Teardown closes the whole browser right after.
        Ok(())
    }

    async fn toggle_devtools(&self, _partition: &str) -> Result<()> {
        Err(EngineError::Driver(
            "devtools toggle is not supported by the cdp backend".into(),
        ))
    }

    fn load_events(&self) -> broadcast::Receiver<LoadEvent> {
        self.load_tx.subscribe()
    }

    fn bridge_events(&self) -> broadcast::Receiver<BridgeCommand> {
        self.bridge_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dirs_are_sanitized_per_partition() {
        let driver = CdpDriver::new(PathBuf::from("/tmp/relive"));
        assert_eq!(
            driver.profile_dir("persist:relive-s1"),
            PathBuf::from("/tmp/relive/persist-relive-s1")
        );
    }
}
