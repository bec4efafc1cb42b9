//! # myfleet
//!
//! Lifecycle management for several MySQL server instances on one host.
//!
//! ## Features
//!
//! - **Provisioning**: per-instance datadir, `my.cnf`, credential and service unit
//! - **Lifecycle**: start, stop, restart and remove through the service supervisor
//! - **Configuration**: typed `[mysqld]` edits with drift detection against the live server
//! - **Backups**: checksummed logical dumps that only appear once complete
//! - **Upgrades**: pre-checked package upgrades with an optional safety backup
//!
//! ## Quick Start
//!
//! ```no_run
//! use myfleet::{config::Settings, InitRequest, LifecycleController};
//!
//! # async fn example() -> Result<(), myfleet::Error> {
//! let controller = LifecycleController::builder(Settings::load(None)?).build()?;
//!
//! let outcome = controller.init(InitRequest::new("prod01").port(3306)).await?;
//! controller.start(&outcome.record().name).await?;
//! controller.set_parameter("prod01", "innodb_buffer_pool_size", "2G").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Each operation runs as one sequence of awaited steps. Concurrent
//! invocations coordinate only through per-instance advisory locks in the
//! registry directory; a lock that cannot be taken in time fails with
//! [`Error::Busy`].

pub mod atomic;
pub mod backup;
pub mod client;
pub mod config;
pub mod confirm;
pub mod credential;
pub mod error;
pub mod exec;
pub mod host;
pub mod lifecycle;
pub mod package;
pub mod parameter;
pub mod registry;
pub mod supervisor;
pub mod upgrade;

// Re-export commonly used types
pub use config::{InstanceLayout, Settings};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{
    ControllerBuilder, InitOutcome, InitRequest, InstanceStatus, LifecycleController, SetOutcome,
};
pub use package::MysqlVersion;
pub use registry::{InstanceRecord, LifecycleState, RegistryStore};
