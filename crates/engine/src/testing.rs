//! In-memory driver and signer doubles for engine tests.
//!
//! [`MockDriver`] records every call and lets tests inject failures and
//! drive load/bridge events by hand, so lifecycle behavior can be
//! tested without a browser.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::cookie::Cookie;
use crate::driver::{BridgeCommand, BrowserDriver, HeaderRewriter, LoadEvent, Viewport};
use crate::error::{EngineError, Result};
use crate::signer::{HeaderSigner, SignedHeaders};

#[derive(Default)]
struct PartitionState {
    cookies: Vec<Cookie>,
    user_agent: Option<String>,
    init_scripts: Vec<String>,
    rewriter: Option<Arc<dyn HeaderRewriter>>,
    navigations: Vec<String>,
    reloads: usize,
    evaluations: Vec<String>,
    visible: bool,
    storage_cleared: bool,
    devtools_toggles: usize,
}

#[derive(Default)]
struct MockState {
    partitions: HashMap<String, PartitionState>,
    destroyed: Vec<String>,
    fail_cookie_pattern: Option<String>,
    fail_navigate: bool,
    fail_create: bool,
    auto_finish_loads: bool,
    evaluate_result: Option<serde_json::Value>,
}

/// Scriptable in-memory [`BrowserDriver`].
pub struct MockDriver {
    state: Mutex<MockState>,
    load_tx: broadcast::Sender<LoadEvent>,
    bridge_tx: broadcast::Sender<BridgeCommand>,
}

impl MockDriver {
    pub fn new() -> Self {
        let (load_tx, _) = broadcast::channel(32);
        let (bridge_tx, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(MockState::default()),
            load_tx,
            bridge_tx,
        }
    }

    /// Every `set_cookie` whose name contains `pattern` fails.
    pub fn fail_cookies_matching(&self, pattern: &str) {
        self.state.lock().fail_cookie_pattern = Some(pattern.to_string());
    }

    pub fn fail_navigate(&self) {
        self.state.lock().fail_navigate = true;
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Emit `LoadEvent::Finished` immediately after every navigate and
    /// reload, for tests that only care about the end state.
    pub fn auto_finish_loads(&self) {
        self.state.lock().auto_finish_loads = true;
    }

    /// Fixes the result of the next `evaluate` calls. Defaults to
    /// `true` when unset.
    pub fn set_evaluate_result(&self, value: serde_json::Value) {
        self.state.lock().evaluate_result = Some(value);
    }

    pub fn emit_load_finished(&self, partition: &str) {
        let _ = self.load_tx.send(LoadEvent::Finished {
            partition: partition.to_string(),
        });
    }

    pub fn emit_load_failed(&self, partition: &str, reason: &str) {
        let _ = self.load_tx.send(LoadEvent::Failed {
            partition: partition.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn emit_bridge(&self, command: BridgeCommand) {
        let _ = self.bridge_tx.send(command);
    }

    pub fn has_partition(&self, partition: &str) -> bool {
        self.state.lock().partitions.contains_key(partition)
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.state.lock().destroyed.clone()
    }

    pub fn storage_cleared(&self, partition: &str) -> bool {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.storage_cleared)
            .unwrap_or(false)
    }

    pub fn is_visible(&self, partition: &str) -> bool {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.visible)
            .unwrap_or(false)
    }

    pub fn navigations(&self, partition: &str) -> Vec<String> {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.navigations.clone())
            .unwrap_or_default()
    }

    pub fn reloads(&self, partition: &str) -> usize {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.reloads)
            .unwrap_or(0)
    }

    pub fn evaluations(&self, partition: &str) -> Vec<String> {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.evaluations.clone())
            .unwrap_or_default()
    }

    pub fn init_scripts(&self, partition: &str) -> Vec<String> {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.init_scripts.clone())
            .unwrap_or_default()
    }

    pub fn user_agent(&self, partition: &str) -> Option<String> {
        self.state
            .lock()
            .partitions
            .get(partition)
            .and_then(|p| p.user_agent.clone())
    }

    pub fn has_rewriter(&self, partition: &str) -> bool {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.rewriter.is_some())
            .unwrap_or(false)
    }

    pub fn rewriter(&self, partition: &str) -> Option<Arc<dyn HeaderRewriter>> {
        self.state
            .lock()
            .partitions
            .get(partition)
            .and_then(|p| p.rewriter.clone())
    }

    pub fn devtools_toggles(&self, partition: &str) -> usize {
        self.state
            .lock()
            .partitions
            .get(partition)
            .map(|p| p.devtools_toggles)
            .unwrap_or(0)
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn create_context(&self, partition: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(EngineError::Driver("create_context forced failure".into()));
        }
        state
            .partitions
            .insert(partition.to_string(), PartitionState::default());
        Ok(())
    }

    async fn destroy_context(&self, partition: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.partitions.remove(partition);
        state.destroyed.push(partition.to_string());
        Ok(())
    }

    async fn clear_storage(&self, partition: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.cookies.clear();
        entry.storage_cleared = true;
        Ok(())
    }

    async fn set_cookie(&self, partition: &str, cookie: Cookie) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(pattern) = &state.fail_cookie_pattern {
            if cookie.name.contains(pattern.as_str()) {
                return Err(EngineError::Driver(format!(
                    "forced set_cookie failure for {}",
                    cookie.name
                )));
            }
        }
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.cookies.retain(|c| c.name != cookie.name);
        entry.cookies.push(cookie);
        Ok(())
    }

    async fn cookie_value(&self, partition: &str, name: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .partitions
            .get(partition)
            .and_then(|p| p.cookies.iter().find(|c| c.name == name))
            .map(|c| c.value.clone()))
    }

    async fn set_user_agent(&self, partition: &str, user_agent: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.user_agent = Some(user_agent.to_string());
        Ok(())
    }

    async fn add_init_script(&self, partition: &str, script: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.init_scripts.push(script.to_string());
        Ok(())
    }

    async fn install_rewriter(
        &self,
        partition: &str,
        rewriter: Arc<dyn HeaderRewriter>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.rewriter = Some(rewriter);
        Ok(())
    }

    async fn remove_rewriter(&self, partition: &str) -> Result<()> {
        if let Some(entry) = self.state.lock().partitions.get_mut(partition) {
            entry.rewriter = None;
        }
        Ok(())
    }

    async fn navigate(&self, partition: &str, url: &str) -> Result<()> {
        let auto = {
            let mut state = self.state.lock();
            if state.fail_navigate {
                return Err(EngineError::Driver("navigate forced failure".into()));
            }
            let entry = state.partitions.entry(partition.to_string()).or_default();
            entry.navigations.push(url.to_string());
            state.auto_finish_loads
        };
        if auto {
            self.emit_load_finished(partition);
        }
        Ok(())
    }

    async fn reload(&self, partition: &str) -> Result<()> {
        let auto = {
            let mut state = self.state.lock();
            let entry = state.partitions.entry(partition.to_string()).or_default();
            entry.reloads += 1;
            state.auto_finish_loads
        };
        if auto {
            self.emit_load_finished(partition);
        }
        Ok(())
    }

    async fn evaluate(&self, partition: &str, script: &str) -> Result<serde_json::Value> {
        let mut state = self.state.lock();
        let result = state
            .evaluate_result
            .clone()
            .unwrap_or(serde_json::Value::Bool(true));
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.evaluations.push(script.to_string());
        Ok(result)
    }

    async fn show(&self, partition: &str, _viewport: Viewport) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.visible = true;
        Ok(())
    }

    async fn hide(&self, partition: &str) -> Result<()> {
        if let Some(entry) = self.state.lock().partitions.get_mut(partition) {
            entry.visible = false;
        }
        Ok(())
    }

    async fn toggle_devtools(&self, partition: &str) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.partitions.entry(partition.to_string()).or_default();
        entry.devtools_toggles += 1;
        Ok(())
    }

    fn load_events(&self) -> broadcast::Receiver<LoadEvent> {
        self.load_tx.subscribe()
    }

    fn bridge_events(&self) -> broadcast::Receiver<BridgeCommand> {
        self.bridge_tx.subscribe()
    }
}

/// [`HeaderSigner`] returning a fixed tuple.
pub struct StaticSigner {
    headers: SignedHeaders,
}

impl StaticSigner {
    pub fn new(headers: SignedHeaders) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl HeaderSigner for StaticSigner {
    async fn sign(&self, _path: &str, _user_id: Option<&str>) -> Result<SignedHeaders> {
        Ok(self.headers.clone())
    }
}

/// [`HeaderSigner`] that always reports the service unavailable.
pub struct FailingSigner;

#[async_trait]
impl HeaderSigner for FailingSigner {
    async fn sign(&self, _path: &str, _user_id: Option<&str>) -> Result<SignedHeaders> {
        Err(EngineError::SigningServiceUnavailable(
            "forced test failure".into(),
        ))
    }
}
