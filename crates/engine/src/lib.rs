//! Replays captured authenticated web sessions into live isolated
//! browser contexts.
//!
//! The engine takes a [`SessionCredential`] (cookie blob, device
//! fingerprint, user agent, platform ids) and impersonates that session
//! against the target site: cookies are installed before any
//! navigation, client-side storage is seeded via a two-phase load, and
//! every outbound request is rewritten with the fingerprint and a
//! signed header tuple from an external signing service.
//!
//! [`LifecycleManager`] is the entry point; it drives everything
//! through the [`BrowserDriver`] seam, so the engine itself never talks
//! to a browser directly. [`testing::MockDriver`] implements the seam
//! in memory for tests.

pub mod bootstrap;
pub mod config;
pub mod cookie;
pub mod credential;
pub mod driver;
pub mod error;
pub mod events;
pub mod headers;
pub mod installer;
pub mod lifecycle;
pub mod overlay;
pub mod signer;
pub mod testing;

pub use config::{EngineConfig, TargetProfile};
pub use cookie::{Cookie, SameSite};
pub use credential::SessionCredential;
pub use driver::{BridgeCommand, BrowserDriver, HeaderRewriter, LoadEvent, Viewport};
pub use error::{EngineError, Result};
pub use events::{EventStream, LifecycleEvent};
pub use headers::RequestInterceptor;
pub use installer::CredentialInstaller;
pub use lifecycle::{LifecycleManager, LifecycleState, StatusSnapshot};
pub use signer::{HeaderSigner, HttpSigner, SignedHeaders};
