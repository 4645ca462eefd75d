//! Shared library for the NFC-e reader workspace
//!
//! This library contains functionality shared by the reader binary and its
//! HTTP control surface:
//! - Error taxonomy mapped onto HTTP responses
//! - Environment-driven configuration

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
