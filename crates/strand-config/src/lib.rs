//! Program and network configuration for strand.
//!
//! A node is described by two TOML files:
//!
//! - **Program** ([`ProgramConfig`]): instances, audio connections, control
//!   callbacks and remote connections. Applying it to a [`Session`] is Load.
//! - **Network** ([`NetworkConfig`]): the roster of nodes and their UDP
//!   addresses, which entry is this machine, and handshake timing.
//!
//! Both validate up front and report every problem at once ([`Issue`]).
//!
//! # Example
//!
//! ```rust
//! use strand_config::ProgramConfig;
//! use strand_net::SyncState;
//!
//! let program = ProgramConfig::from_toml(r#"
//!     name = "count"
//!
//!     [[instances]]
//!     class = "counter"
//!     label = "clock"
//!
//!     [[instances]]
//!     class = "probe"
//!
//!     [[callbacks]]
//!     src = "clock.count"
//!     dst = "probe0.in"
//! "#)?;
//!
//! let mut session = program.instantiate(strand_units::builtin_registry(), None)?;
//! assert_eq!(session.sync()?, SyncState::Success);
//! session.execute_cycle()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! [`Session`]: strand_net::Session

mod error;
mod network;
mod program;

/// Platform-specific paths for programs and configuration.
pub mod paths;

/// Program and roster validation.
pub mod validation;

pub use error::{ConfigError, Result};
pub use network::{NetworkConfig, NodeConfig, SyncConfig};
pub use paths::{find_program, user_config_dir, user_programs_dir};
pub use program::{Endpoint, InstanceConfig, LinkConfig, ProgramConfig, RemoteConfig};
pub use validation::Issue;
