//! Context lifecycle orchestration.
//!
//! [`LifecycleManager`] owns the single active browsing context and
//! drives an open attempt through its phases: create the partition,
//! seed cookies, navigate, seed storage on first load, force a reload,
//! reveal on second load. Timeout, load failure, and user close all
//! funnel into one best-effort teardown path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::bootstrap::{self, BootstrapData};
use crate::config::EngineConfig;
use crate::credential::SessionCredential;
use crate::driver::{BridgeCommand, BrowserDriver, LoadEvent};
use crate::error::{EngineError, Result};
use crate::events::{EventHub, EventStream, LifecycleEvent};
use crate::headers::RequestInterceptor;
use crate::installer::CredentialInstaller;
use crate::overlay;
use crate::signer::HeaderSigner;

/// Phases of a context's life. `Idle` doubles as the rest state after
/// close or error teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Idle,
    Creating,
    SeedingCredentials,
    LoadingFirst,
    AwaitingBootstrapReload,
    LoadingSecond,
    Visible,
    Closing,
}

/// Point-in-time view of the manager, for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Single-use latch deciding which terminal outcome (reveal, timeout,
/// load failure) acts on a context. Whichever fires first wins; the
/// rest become no-ops.
pub(crate) struct TerminalLatch(AtomicBool);

impl TerminalLatch {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// True exactly once, for the first caller.
    pub fn fire(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn fired(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct ActiveContext {
    partition: String,
    label: String,
    latch: Arc<TerminalLatch>,
    close_tx: watch::Sender<bool>,
}

struct Shared {
    state: LifecycleState,
    partition: Option<String>,
    label: Option<String>,
}

enum Outcome {
    Closed,
    Error(String),
}

/// Orchestrates the one-at-a-time browsing context.
pub struct LifecycleManager {
    driver: Arc<dyn BrowserDriver>,
    config: EngineConfig,
    signer: Option<Arc<dyn HeaderSigner>>,
    hub: EventHub,
    active: tokio::sync::Mutex<Option<ActiveContext>>,
    shared: Mutex<Shared>,
    // Partition -> installed interceptor. Guards against stacking a
    // second rewriter on a partition that already has one.
    interceptors: Mutex<HashMap<String, Arc<RequestInterceptor>>>,
}

impl LifecycleManager {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        config: EngineConfig,
        signer: Option<Arc<dyn HeaderSigner>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            config,
            signer,
            hub: EventHub::default(),
            active: tokio::sync::Mutex::new(None),
            shared: Mutex::new(Shared {
                state: LifecycleState::Idle,
                partition: None,
                label: None,
            }),
            interceptors: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.lock().state
    }

    pub fn status(&self) -> StatusSnapshot {
        let shared = self.shared.lock();
        StatusSnapshot {
            state: shared.state,
            partition: shared.partition.clone(),
            label: shared.label.clone(),
        }
    }

    fn set_state(&self, state: LifecycleState) {
        debug!(target: "relive.lifecycle", ?state, "state change");
        self.shared.lock().state = state;
    }

    /// Opens a context for `credential`, replacing any active one.
    ///
    /// Returns once navigation has been issued; progress from there is
    /// reported through lifecycle events. A returned error means the
    /// attempt never reached navigation and everything was torn down.
    pub async fn open(self: &Arc<Self>, credential: SessionCredential) -> Result<()> {
        credential.validate()?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(
                target: "relive.lifecycle",
                partition = %previous.partition,
                "closing previous context before open"
            );
            self.teardown(previous, Outcome::Closed).await;
        }

        let partition = credential.partition_key();
        let label = if credential.display_name.trim().is_empty() {
            credential.id.clone()
        } else {
            credential.display_name.clone()
        };
        {
            let mut shared = self.shared.lock();
            shared.state = LifecycleState::Creating;
            shared.partition = Some(partition.clone());
            shared.label = Some(label.clone());
        }
        self.hub.emit(LifecycleEvent::Loading);
        info!(target: "relive.lifecycle", partition = %partition, "opening context");

        match self.setup(&partition, &credential).await {
            Ok(load_rx) => {
                let latch = Arc::new(TerminalLatch::new());
                let (close_tx, close_rx) = watch::channel(false);
                *active = Some(ActiveContext {
                    partition: partition.clone(),
                    label,
                    latch: latch.clone(),
                    close_tx,
                });
                drop(active);

                self.spawn_load_task(partition.clone(), credential, load_rx, latch.clone(), close_rx.clone());
                self.spawn_timeout_task(partition.clone(), latch, close_rx.clone());
                self.spawn_bridge_task(partition, close_rx);
                Ok(())
            }
            Err(err) => {
                warn!(target: "relive.lifecycle", partition = %partition, error = %err, "open failed");
                self.cleanup_partition(&partition).await;
                {
                    let mut shared = self.shared.lock();
                    shared.state = LifecycleState::Idle;
                    shared.partition = None;
                    shared.label = None;
                }
                self.hub.emit(LifecycleEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Runs the pre-navigation phases and issues the first navigation.
    /// On success the returned receiver already covers every load event
    /// the navigation can produce.
    async fn setup(
        &self,
        partition: &str,
        credential: &SessionCredential,
    ) -> Result<broadcast::Receiver<LoadEvent>> {
        self.driver.create_context(partition).await?;
        self.driver.clear_storage(partition).await?;

        self.set_state(LifecycleState::SeedingCredentials);
        let installer = CredentialInstaller::new(self.driver.as_ref(), &self.config);
        installer.install(partition, credential).await?;

        if !credential.user_agent.is_empty() {
            self.driver
                .set_user_agent(partition, &credential.user_agent)
                .await?;
        }

        let interceptor = {
            let mut interceptors = self.interceptors.lock();
            match interceptors.get(partition) {
                Some(existing) => {
                    debug!(
                        target: "relive.lifecycle",
                        partition,
                        "interceptor already registered, reusing"
                    );
                    existing.clone()
                }
                None => {
                    let interceptor = Arc::new(RequestInterceptor::new(
                        self.config.profile.clone(),
                        credential.user_agent.clone(),
                        credential.fingerprint.clone(),
                        credential.signing_user().map(str::to_string),
                        self.signer.clone(),
                        self.config.header_ttl,
                    ));
                    interceptors.insert(partition.to_string(), interceptor.clone());
                    interceptor
                }
            }
        };
        self.driver.install_rewriter(partition, interceptor).await?;

        let data = BootstrapData::from_credential(credential);
        let init = bootstrap::init_script(&self.config.profile, &data);
        if !init.is_empty() {
            self.driver.add_init_script(partition, &init).await?;
        }

        let load_rx = self.driver.load_events();
        self.set_state(LifecycleState::LoadingFirst);
        self.driver
            .navigate(partition, &self.config.profile.landing_url())
            .await?;
        Ok(load_rx)
    }

    fn spawn_load_task(
        self: &Arc<Self>,
        partition: String,
        credential: SessionCredential,
        mut load_rx: broadcast::Receiver<LoadEvent>,
        latch: Arc<TerminalLatch>,
        mut close_rx: watch::Receiver<bool>,
    ) {
        let mgr = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = load_rx.recv() => event,
                    _ = close_rx.changed() => return,
                };
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "relive.lifecycle", dropped = n, "load events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if event.partition() != partition {
                    continue;
                }

                match event {
                    LoadEvent::Failed { reason, .. } => {
                        if latch.fire() {
                            mgr.fail_context(&partition, EngineError::LoadFailure(reason)).await;
                        }
                        return;
                    }
                    LoadEvent::Finished { .. } => match mgr.state() {
                        LifecycleState::LoadingFirst => {
                            if mgr.seed_and_reload(&partition, &credential).await {
                                continue;
                            }
                            // Storage was not seedable; reveal what we
                            // have rather than reloading forever.
                            mgr.reveal(&partition, &credential, &latch).await;
                        }
                        LifecycleState::LoadingSecond => {
                            mgr.reveal(&partition, &credential, &latch).await;
                        }
                        LifecycleState::Visible => {
                            mgr.inject_overlay(&partition, &credential).await;
                        }
                        state => {
                            debug!(
                                target: "relive.lifecycle",
                                ?state,
                                "ignoring load completion in this state"
                            );
                        }
                    },
                }
            }
        });
    }

    fn spawn_timeout_task(
        self: &Arc<Self>,
        partition: String,
        latch: Arc<TerminalLatch>,
        mut close_rx: watch::Receiver<bool>,
    ) {
        let mgr = self.clone();
        let timeout = self.config.load_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = close_rx.changed() => return,
            }
            if latch.fire() {
                let error = EngineError::LoadTimeout {
                    ms: timeout.as_millis() as u64,
                };
                mgr.fail_context(&partition, error).await;
            }
        });
    }

    fn spawn_bridge_task(self: &Arc<Self>, partition: String, mut close_rx: watch::Receiver<bool>) {
        let mgr = self.clone();
        let mut bridge_rx = mgr.driver.bridge_events();
        tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    command = bridge_rx.recv() => command,
                    _ = close_rx.changed() => return,
                };
                let command = match command {
                    Ok(command) => command,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if command.partition() != partition {
                    continue;
                }
                match command {
                    BridgeCommand::CloseContext { .. } => {
                        if let Err(err) = mgr.close().await {
                            warn!(target: "relive.lifecycle", error = %err, "bridge close failed");
                        }
                        return;
                    }
                    BridgeCommand::ToggleDevtools { .. } => {
                        if let Err(err) = mgr.toggle_devtools().await {
                            warn!(target: "relive.lifecycle", error = %err, "bridge devtools toggle failed");
                        }
                    }
                }
            }
        });
    }

    /// First-load completion: seed storage, then force the reload that
    /// lets the page boot against it. True when the reload was issued.
    async fn seed_and_reload(&self, partition: &str, credential: &SessionCredential) -> bool {
        self.set_state(LifecycleState::AwaitingBootstrapReload);
        let data = BootstrapData::from_credential(credential);
        let script = bootstrap::seed_script(&self.config.profile, &data);

        let seeded = match self.driver.evaluate(partition, &script).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(err) => {
                warn!(target: "relive.lifecycle", partition, error = %err, "storage seeding failed");
                false
            }
        };
        if !seeded {
            warn!(
                target: "relive.lifecycle",
                partition,
                "storage not seedable, revealing without reload"
            );
            return false;
        }

        self.set_state(LifecycleState::LoadingSecond);
        if let Err(err) = self.driver.reload(partition).await {
            warn!(target: "relive.lifecycle", partition, error = %err, "forced reload failed");
            return false;
        }
        debug!(target: "relive.lifecycle", partition, "storage seeded, reload issued");
        true
    }

    /// Terminal success: show the context, inject the overlay, emit
    /// `Loaded`. Skipped when timeout or failure already won the latch.
    async fn reveal(&self, partition: &str, credential: &SessionCredential, latch: &TerminalLatch) {
        if !latch.fire() {
            return;
        }
        if let Err(err) = self.driver.show(partition, self.config.viewport).await {
            warn!(target: "relive.lifecycle", partition, error = %err, "show failed");
        }
        self.inject_overlay(partition, credential).await;
        self.set_state(LifecycleState::Visible);
        self.hub.emit(LifecycleEvent::Loaded);
        info!(target: "relive.lifecycle", partition, "context visible");
    }

    async fn inject_overlay(&self, partition: &str, credential: &SessionCredential) {
        let label = if credential.display_name.trim().is_empty() {
            &credential.id
        } else {
            &credential.display_name
        };
        let script = overlay::inject_script(label);
        if let Err(err) = self.driver.evaluate(partition, &script).await {
            warn!(target: "relive.lifecycle", partition, error = %err, "overlay injection failed");
        }
    }

    /// Closes the active context. Idempotent: a second call with
    /// nothing active is a successful no-op and emits nothing.
    pub async fn close(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(ctx) => {
                self.teardown(ctx, Outcome::Closed).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Error-path teardown, entered by the timeout and load-failure
    /// tasks after winning the latch. A partition mismatch means the
    /// context was already replaced and the task is stale.
    async fn fail_context(&self, partition: &str, error: EngineError) {
        let mut active = self.active.lock().await;
        let is_current = active
            .as_ref()
            .map(|ctx| ctx.partition == partition)
            .unwrap_or(false);
        if !is_current {
            debug!(target: "relive.lifecycle", partition, "stale failure ignored");
            return;
        }
        if let Some(ctx) = active.take() {
            warn!(target: "relive.lifecycle", partition, error = %error, "context failed");
            self.teardown(ctx, Outcome::Error(error.to_string())).await;
        }
    }

    /// Best-effort teardown. Every step runs regardless of earlier
    /// failures; the closing event fires last.
    async fn teardown(&self, ctx: ActiveContext, outcome: Outcome) {
        self.set_state(LifecycleState::Closing);
        ctx.latch.fire();
        let _ = ctx.close_tx.send(true);

        if let Err(err) = self.driver.hide(&ctx.partition).await {
            warn!(target: "relive.lifecycle", partition = %ctx.partition, error = %err, "hide failed");
        }
        self.cleanup_partition(&ctx.partition).await;

        {
            let mut shared = self.shared.lock();
            shared.state = LifecycleState::Idle;
            shared.partition = None;
            shared.label = None;
        }
        match outcome {
            Outcome::Closed => {
                info!(target: "relive.lifecycle", partition = %ctx.partition, label = %ctx.label, "context closed");
                self.hub.emit(LifecycleEvent::Closed);
            }
            Outcome::Error(message) => {
                self.hub.emit(LifecycleEvent::Error(message));
            }
        }
    }

    /// Uninstalls the interceptor and releases the partition's storage
    /// and browsing-engine resources.
    async fn cleanup_partition(&self, partition: &str) {
        if let Some(interceptor) = self.interceptors.lock().remove(partition) {
            interceptor.clear_cache();
        }
        if let Err(err) = self.driver.remove_rewriter(partition).await {
            warn!(target: "relive.lifecycle", partition, error = %err, "rewriter removal failed");
        }
        if let Err(err) = self.driver.clear_storage(partition).await {
            warn!(target: "relive.lifecycle", partition, error = %err, "storage clear failed");
        }
        if let Err(err) = self.driver.destroy_context(partition).await {
            warn!(target: "relive.lifecycle", partition, error = %err, "context destroy failed");
        }
    }

    /// Toggles devtools on the active context.
    pub async fn toggle_devtools(&self) -> Result<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(ctx) => self.driver.toggle_devtools(&ctx.partition).await,
            None => Err(EngineError::NoActiveContext),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    fn credential() -> SessionCredential {
        SessionCredential {
            id: "s1".into(),
            cookie_blob: "auth=abc".into(),
            fingerprint: "fp1".into(),
            user_agent: "UA".into(),
            ..Default::default()
        }
    }

    #[test]
    fn latch_fires_exactly_once() {
        let latch = TerminalLatch::new();
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.fired());
    }

    #[tokio::test]
    async fn invalid_credential_is_rejected_before_any_driver_call() {
        let driver = Arc::new(MockDriver::new());
        let mgr = LifecycleManager::new(driver.clone(), EngineConfig::default(), None);

        let mut cred = credential();
        cred.cookie_blob = String::new();
        let err = mgr.open(cred).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidCredential(_)));
        assert!(driver.destroyed().is_empty());
        assert_eq!(mgr.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn open_failure_tears_down_and_emits_error() {
        let driver = Arc::new(MockDriver::new());
        driver.fail_navigate();
        let mgr = LifecycleManager::new(driver.clone(), EngineConfig::default(), None);
        let mut events = mgr.subscribe();

        let err = mgr.open(credential()).await.unwrap_err();
        assert!(matches!(err, EngineError::Driver(_)));
        assert_eq!(events.recv().await, Some(LifecycleEvent::Loading));
        assert!(matches!(events.recv().await, Some(LifecycleEvent::Error(_))));
        assert_eq!(driver.destroyed(), vec!["persist:relive-s1".to_string()]);
        assert_eq!(mgr.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn toggle_devtools_without_context_errors() {
        let driver = Arc::new(MockDriver::new());
        let mgr = LifecycleManager::new(driver, EngineConfig::default(), None);
        assert!(matches!(
            mgr.toggle_devtools().await,
            Err(EngineError::NoActiveContext)
        ));
    }

    #[tokio::test]
    async fn close_without_context_is_a_silent_no_op() {
        let driver = Arc::new(MockDriver::new());
        let mgr = LifecycleManager::new(driver, EngineConfig::default(), None);
        let mut events = mgr.subscribe();
        mgr.close().await.unwrap();
        assert_eq!(events.try_recv(), None);
    }
}
