//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the Quran data layer:
//! - Logging and tracing infrastructure
//! - Configuration management, including the optional OAuth registration
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the other `core-*` crates
//! depend on. It establishes the logging conventions and the fail-fast
//! configuration builder used to wire host bridges into the core.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, OAuthAppConfiguration};
pub use error::{Error, Result};
