//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the player core:
//! - Logging and tracing infrastructure
//! - Configuration and bridge wiring
//! - Event bus
//!
//! Every other `core-*` crate depends on this one for its logging conventions
//! and event broadcasting.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
