//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the Quran data layer and the
//! platform-specific code around it. Each trait represents a capability that
//! the core requires but that must be implemented differently per platform
//! (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations used for OIDC
//!   discovery, token exchange and authenticated API calls
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//!
//! ### User Interaction
//! - [`AuthorizationPresenter`](authorization::AuthorizationPresenter) - Presents
//!   the interactive OAuth authorization page and hands back the redirect
//!
//! ### Utilities
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In Progress |
//! | iOS      | Host app (Swift)    | 📋 Planned |
//! | Android  | Host app (Kotlin)   | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert their native errors to `BridgeError` and keep
//! secrets out of error messages.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so a single implementation
//! can be shared across async tasks.

pub mod authorization;
pub mod error;
pub mod http;
pub mod logging;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use authorization::{AuthorizationPresenter, AuthorizationRequest};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use storage::SecureStore;
