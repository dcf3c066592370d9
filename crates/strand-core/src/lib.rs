//! Strand Core - instance graph and execution scheduler
//!
//! This crate holds the single-node half of the strand runtime: the class
//! registry, instances and their variables, audio-buffer aliasing, control
//! callbacks, and the once-per-block exec sweep.
//!
//! # Core Abstractions
//!
//! ## Classes and Units
//!
//! - [`Unit`] - Object-safe trait implemented by every processing unit
//! - [`UnitFactory`] / [`ClassRegistry`] - Label -> factory table
//! - [`AllocContext`] - Variable declaration API handed to factories
//! - [`UnitContext`] - Scoped access to an instance's variables at run time
//!
//! ## Variables
//!
//! - [`Value`] / [`VarType`] - Typed control values and their binary codec
//! - [`VarSet`] / [`Var`] - Ordered per-instance variables
//! - [`OwnedBuffer`] / [`BufferView`] - Audio ownership vs. aliasing
//!
//! ## Graph
//!
//! - [`Graph`] - Load, connect, dispatch, reset, store, unload
//! - [`Graph::execute_cycle`] - The exec sweep, with [`CycleStats`]
//! - [`Message`] / [`Event`] - Host messages and the unit event envelope
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strand_core::{
//!     AllocContext, Args, ClassCategory, ClassDescriptor, ClassRegistry, Graph, GraphConfig,
//!     Unit, UnitContext, UnitError, VarId,
//! };
//!
//! struct Counter {
//!     count: VarId,
//! }
//!
//! impl Unit for Counter {
//!     fn exec(&mut self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
//!         let n = ctx.get_u32(self.count)?;
//!         ctx.set(self.count, n + 1)
//!     }
//! }
//!
//! fn counter(ctx: &mut AllocContext<'_>, _: &Args) -> Result<Box<dyn Unit>, UnitError> {
//!     let count = ctx.output("count", 0_u32)?;
//!     Ok(Box::new(Counter { count }))
//! }
//!
//! let mut registry = ClassRegistry::new();
//! registry.register(
//!     ClassDescriptor {
//!         label: "counter",
//!         description: "counts cycles",
//!         category: ClassCategory::Control,
//!     },
//!     counter,
//! );
//!
//! let mut graph = Graph::new(Arc::new(registry), GraphConfig::default());
//! let id = graph.allocate_instance("counter", None, &Args::new()).unwrap();
//! graph.finish_load().unwrap();
//! graph.execute_cycle().unwrap();
//!
//! let (_, count) = graph.resolve("counter0", "count").unwrap();
//! assert_eq!(graph.value(id, count), Some(&strand_core::Value::UInt(1)));
//! ```

pub mod buffer;
pub mod error;
pub mod event;
pub mod graph;
pub mod registry;
pub mod scheduler;
pub mod symbol;
pub mod unit;
pub mod value;
pub mod var;

#[cfg(test)]
mod testing;

pub use buffer::{AudioBuffer, BufferId, BufferPool, BufferView, OwnedBuffer};
pub use error::{Error, Result};
pub use event::{Event, EventFlags, Message, MidiMsg, Payload};
pub use graph::{Graph, GraphConfig, Instance, InstanceId};
pub use registry::{ClassCategory, ClassDescriptor, ClassId, ClassRegistry, UnitFactory};
pub use scheduler::{CycleError, CycleReport, CycleStats, ExecFailure, MAX_ROUTED_WRITES};
pub use symbol::{MIDI_SYMBOL, RESET_SYMBOL, SymbolId, SymbolTable};
pub use unit::{AllocContext, Args, Unit, UnitContext, UnitError};
pub use value::{CodecError, Value, VarType};
pub use var::{Direction, Storage, Subscriber, Var, VarId, VarSet};
