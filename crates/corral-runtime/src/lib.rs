//! # corral-runtime
//!
//! Container runtime layer for corral workspace environments.
//! Provides an async abstraction over the container engine that actually
//! runs machines.
//!
//! ## Quick Start
//!
//! ```no_run
//! use corral_runtime::{ContainerRuntime, ContainerSpec, DockerCli};
//!
//! # async fn example() -> corral_runtime::Result<()> {
//! let docker = DockerCli::new();
//!
//! let spec = ContainerSpec::builder("ws1-db", "postgres:16")
//!     .env("POSTGRES_PASSWORD=secret")
//!     .memory_bytes(512 * 1024 * 1024)
//!     .network("ws1", "db")
//!     .build()?;
//!
//! let id = docker.create_container(&spec).await?;
//! docker.start_container(&id).await?;
//!
//! // Cleanup
//! docker.stop_container(&id).await?;
//! docker.remove_container(&id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Runtime Trait**: `create`, `start`, `stop`, `remove`, `inspect` as opaque async operations
//! - **Docker CLI Backend**: drives the `docker` binary, no daemon socket bindings required
//! - **Mock Backend**: scripted failures, delays and a call log for engine tests
//! - **Builder Pattern**: ergonomic container configuration with `ContainerSpecBuilder`

mod builder;
mod docker;
mod error;
mod mock;
mod runtime;
mod spec;

pub use builder::ContainerSpecBuilder;
pub use docker::DockerCli;
pub use error::{Result, RuntimeError};
pub use mock::{MockRuntime, RuntimeCall, MACHINE_LABEL};
pub use runtime::{ContainerId, ContainerRuntime, ContainerStatus};
pub use spec::ContainerSpec;
