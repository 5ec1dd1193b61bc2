//! The seam between the engine and the host browser.
//!
//! Everything the lifecycle manager does to a real browser goes through
//! [`BrowserDriver`]. The engine owns the ordering and the policy; the
//! driver owns the mechanics. [`crate::testing::MockDriver`] implements
//! this trait for tests, and downstream crates provide real backends.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::cookie::Cookie;
use crate::error::Result;

/// Host viewport dimensions pushed to a context when it is revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Load-completion events surfaced by the driver, one per finished or
/// failed top-level navigation inside a partitioned context.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    Finished { partition: String },
    Failed { partition: String, reason: String },
}

impl LoadEvent {
    pub fn partition(&self) -> &str {
        match self {
            LoadEvent::Finished { partition } => partition,
            LoadEvent::Failed { partition, .. } => partition,
        }
    }
}

/// Commands invoked from inside the page via the overlay bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    CloseContext { partition: String },
    ToggleDevtools { partition: String },
}

impl BridgeCommand {
    pub fn partition(&self) -> &str {
        match self {
            BridgeCommand::CloseContext { partition } => partition,
            BridgeCommand::ToggleDevtools { partition } => partition,
        }
    }
}

/// Hook invoked for every outbound request to the target origin.
///
/// Implementations must always return a header set; a request is never
/// cancelled from here, only forwarded with (possibly unmodified)
/// headers.
#[async_trait]
pub trait HeaderRewriter: Send + Sync {
    async fn rewrite(&self, url: &str, headers: Vec<(String, String)>) -> Vec<(String, String)>;
}

/// Operations the engine needs from a host browser, keyed by partition.
///
/// Drivers may assume the engine never runs two contexts concurrently,
/// but every method must tolerate being called for a partition that is
/// already gone: teardown is best-effort and re-entrant.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Creates an isolated context for `partition`. Cookie store, cache
    /// and client-side storage must not be shared with any other
    /// partition.
    async fn create_context(&self, partition: &str) -> Result<()>;

    /// Releases all browsing-engine resources held by `partition`.
    async fn destroy_context(&self, partition: &str) -> Result<()>;

    /// Clears cookies and client-side storage for `partition`.
    async fn clear_storage(&self, partition: &str) -> Result<()>;

    async fn set_cookie(&self, partition: &str, cookie: Cookie) -> Result<()>;

    /// Reads back a cookie value by name, for diagnostics.
    async fn cookie_value(&self, partition: &str, name: &str) -> Result<Option<String>>;

    async fn set_user_agent(&self, partition: &str, user_agent: &str) -> Result<()>;

    /// Registers a script that runs before any page script on every
    /// navigation within `partition`.
    async fn add_init_script(&self, partition: &str, script: &str) -> Result<()>;

    /// Installs the outbound header hook for `partition`. Replaces any
    /// previously installed hook.
    async fn install_rewriter(
        &self,
        partition: &str,
        rewriter: Arc<dyn HeaderRewriter>,
    ) -> Result<()>;

    async fn remove_rewriter(&self, partition: &str) -> Result<()>;

    async fn navigate(&self, partition: &str, url: &str) -> Result<()>;

    async fn reload(&self, partition: &str) -> Result<()>;

    /// Evaluates a script in the current page of `partition`.
    async fn evaluate(&self, partition: &str, script: &str) -> Result<serde_json::Value>;

    /// Reveals the context and sizes it to the host viewport.
    async fn show(&self, partition: &str, viewport: Viewport) -> Result<()>;

    /// Detaches the context from the host view.
    async fn hide(&self, partition: &str) -> Result<()>;

    async fn toggle_devtools(&self, partition: &str) -> Result<()>;

    /// Subscribes to load events for all partitions this driver owns.
    fn load_events(&self) -> broadcast::Receiver<LoadEvent>;

    /// Subscribes to overlay bridge invocations. Drivers that cannot
    /// expose a page bridge return a receiver that never yields.
    fn bridge_events(&self) -> broadcast::Receiver<BridgeCommand>;
}
