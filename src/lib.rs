//! Workspace umbrella crate.
//!
//! Host applications depend on `quran-data-workspace` and pick features
//! instead of wiring `core-service`, `core-auth` and `core-persistence`
//! individually. The `desktop-shims` feature pulls in the keyring secure
//! store and the reqwest HTTP client as default bridges.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
