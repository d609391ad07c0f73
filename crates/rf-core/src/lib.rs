//! rf-core: Shared types for the spectrum-monitoring engine
//!
//! This crate provides the foundational types used across all engine crates:
//! - `config` - desired/derived acquisition configuration and window model
//! - `message` - control-plane wire documents (inbound config, outbound PSD)
//! - `error` - engine-wide error enum

mod config;
mod error;
mod message;

pub use config::*;
pub use error::*;
pub use message::*;
