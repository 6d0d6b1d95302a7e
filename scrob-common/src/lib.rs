//! # Scrob Common Library
//!
//! Shared code for the scrobble-history tools including:
//! - Error type and result alias
//! - TOML bootstrap configuration and API key resolution
//! - Progress event types (ProgressEvent enum) and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
