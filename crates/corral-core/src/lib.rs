//! # corral-core
//!
//! Orchestration of workspace environments: named sets of machines started
//! in dependency order on a container runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   corral-core (host)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  EnvironmentDescriptor                                   │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌──────────────────┐     ┌──────────────────────────┐   │
//! │  │ HandlerRegistry  │────▶│ EnvironmentHandler       │   │
//! │  │  (by type tag)   │     │  - validate()            │   │
//! │  └──────────────────┘     │  - plan()  → StartPlan   │   │
//! │           │               │  - driver()              │   │
//! │           ▼               └──────────────────────────┘   │
//! │  ┌──────────────────┐     ┌──────────────────────────┐   │
//! │  │ EnvironmentEngine│────▶│ MachineDriver            │   │
//! │  │  - waves         │     │  + env/volume/host       │   │
//! │  │  - rollback      │     │    providers             │   │
//! │  │  - snapshots     │     └──────────────────────────┘   │
//! │  └──────────────────┘                 │                  │
//! │           │ events                    ▼                  │
//! │           ▼               ┌──────────────────────────┐   │
//! │      Subscription         │ ContainerRuntime         │   │
//! │                           │   (corral-runtime)       │   │
//! │                           └──────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use corral_core::{
//!     DriverConfig, EngineConfig, EnvironmentDescriptor, EnvironmentEngine, HandlerRegistry,
//!     MachineConfig, MachineDriver,
//! };
//! use corral_runtime::DockerCli;
//! use std::sync::Arc;
//!
//! # async fn example() -> corral_core::Result<()> {
//! let driver = MachineDriver::from_config(Arc::new(DockerCli::new()), &DriverConfig::default());
//! let engine = EnvironmentEngine::new(EngineConfig::default(), HandlerRegistry::native(driver));
//!
//! let env = EnvironmentDescriptor::new(
//!     "my-workspace",
//!     vec![
//!         MachineConfig::builder("db", "postgres:16").build(),
//!         MachineConfig::builder("app", "tomcat:9").dev().depends_on("db").build(),
//!     ],
//! );
//!
//! let mut events = engine.subscribe("my-workspace");
//! let handle = engine.start_environment(env).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//!     if event.is_finished() {
//!         break;
//!     }
//! }
//! let snapshot = handle.wait().await?;
//!
//! engine.stop_environment(&snapshot.name).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Validation**: structural checks of descriptors before anything runs
//! - **Wave Planning**: dependency ordering with cycle reporting
//! - **Bounded Starts**: machines of a wave start concurrently under a limit
//! - **Rollback**: started machines are destroyed when a start fails or is cancelled
//! - **Snapshots & Events**: immutable state views and change notifications

mod config;
mod driver;
mod engine;
mod error;
mod events;
mod handler;
mod model;
mod providers;
mod resolver;
mod state;
mod validator;

pub use config::{DriverConfig, DriverConfigBuilder, EngineConfig, EngineConfigBuilder};
pub use driver::{DriverError, EnvContext, MachineDriver, MachineHandle, DEV_LABEL, ENVIRONMENT_LABEL};
pub use engine::{EnvironmentEngine, StartHandle};
pub use error::{CoreError, Result};
pub use events::{EnvironmentEvent, Outcome, Subscription};
pub use handler::{EnvironmentHandler, HandlerRegistry, NativeEnvironmentHandler};
pub use model::{
    link_target, EnvironmentDescriptor, Limits, MachineConfig, MachineConfigBuilder,
    MachineSource, ServerConf, SourceKind, DOCKER_MACHINE_TYPE, NATIVE_ENVIRONMENT_TYPE,
};
pub use providers::{
    parse_list, EnvVariablesProvider, ExtraHostsProvider, ExtraVolumesProvider, HostsProvider,
    HttpProxyEnvProvider, VolumesProvider,
};
pub use resolver::{plan, CycleError, StartPlan};
pub use state::{EnvironmentSnapshot, EnvironmentStatus, Failure, MachineSnapshot, MachineState};
pub use validator::{validate, ValidationError};
