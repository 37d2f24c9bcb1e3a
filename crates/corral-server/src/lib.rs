//! # corral-server
//!
//! HTTP service running workspace environments on docker.
//!
//! The binary reads [`CorralConfig`] from `CORRAL_*` environment variables,
//! builds an [`corral_core::EnvironmentEngine`] backed by the docker CLI and
//! serves the JSON API of [`http`] until interrupted. On shutdown every
//! environment is stopped.

pub mod config;
pub mod http;
pub mod types;

pub use config::{ConfigError, CorralConfig};
