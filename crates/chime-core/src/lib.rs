//! `chime-core`: configuration and error types shared by every chime crate.

pub mod config;
pub mod error;

pub use config::ChimeConfig;
pub use error::{ChimeError, Result};
