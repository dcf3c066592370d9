//! Network synchronization and session runtime for strand.
//!
//! This crate provides:
//!
//! - **Wire format**: [`Packet`] encode/decode for sync messages and events
//! - **Transports**: the [`Transport`] trait with [`UdpTransport`] and the
//!   in-process [`LoopbackHub`]
//! - **Handshake**: [`SyncEngine`], the Pre/Pending/Success/Fail state
//!   machine that binds symbolic cross-node connections to numeric ids
//! - **Worker**: [`SyncWorker`], the thread that drives a pending handshake
//! - **Session**: [`Session`], a graph plus its network link
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use strand_core::{Args, Graph, GraphConfig};
//! use strand_net::{LoopbackHub, Session, SyncPolicy, SyncState};
//!
//! let labels = vec!["left".to_string(), "right".to_string()];
//! let mut sessions = Vec::new();
//! for transport in LoopbackHub::connect(2) {
//!     let graph = Graph::new(strand_units::builtin_registry(), GraphConfig::default());
//!     let session =
//!         Session::with_network(graph, Box::new(transport), labels.clone(), SyncPolicy::default())?;
//!     sessions.push(session);
//! }
//!
//! // left: knob.out feeds probe.in on right
//! let left = &mut sessions[0];
//! let knob = left.graph_mut().allocate_instance("number", Some("knob"), &Args::new())?;
//! let (_, out) = left.graph().resolve("knob", "out")?;
//! left.declare_remote(knob, out, "right", "probe", "in")?;
//! sessions[1].graph_mut().allocate_instance("probe", Some("probe"), &Args::new())?;
//!
//! for session in &mut sessions {
//!     session.finish_load()?;
//!     session.sync()?;
//! }
//! for session in &mut sessions {
//!     assert_eq!(session.wait_sync(Duration::from_secs(5))?, SyncState::Success);
//! }
//! # Ok::<(), strand_net::NetError>(())
//! ```

pub mod conn;
pub mod error;
pub mod session;
pub mod sync;
pub mod transport;
pub mod wire;
pub mod worker;

pub use conn::{ConnTable, Directory, DstConn, DstId, SrcConn, SrcId};
pub use error::{ErrorCode, NetError, Result};
pub use session::Session;
pub use sync::{NetNode, NodeFlags, SyncEngine, SyncPolicy, SyncState};
pub use transport::{Datagram, LoopbackHub, LoopbackTransport, NodeId, Transport, UdpTransport};
pub use wire::{Packet, WireError};
pub use worker::{NetLink, SyncWorker};
