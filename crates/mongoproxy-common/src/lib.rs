//! mongoproxy common - shared error and configuration types
//!
//! This crate provides functionality used by every mongoproxy component:
//! - Error types and handling
//! - Configuration management

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Error, ErrorKind, NetworkError, ProtocolError, Result};
