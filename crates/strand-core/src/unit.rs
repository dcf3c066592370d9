//! The unit trait and the contexts units run in.
//!
//! A class is a factory ([`UnitFactory`](crate::UnitFactory)) plus the
//! [`Unit`] implementation it returns. The factory declares the instance's
//! variables through an [`AllocContext`]; afterwards the graph drives the unit
//! through `exec`/`recv`/`reset`/`store`/`free`, each time handing it a
//! [`UnitContext`] scoped to the instance's own variables.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::buffer::{AudioBuffer, BufferPool};
use crate::event::Event;
use crate::graph::{GraphConfig, InstanceId};
use crate::symbol::{SymbolId, SymbolTable};
use crate::value::{Value, VarType};
use crate::var::{Direction, Storage, Var, VarId, VarSet};

/// Runtime behavior of an instance.
///
/// Every method has a no-op default so simple units implement only what they
/// need. All methods run on the thread that owns the graph.
pub trait Unit: Send {
    /// Called once per cycle for exec-enabled instances.
    fn exec(&mut self, _ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        Ok(())
    }

    /// Called after a value was stored into one of this instance's
    /// variables, or when a subscribed attribute is broadcast.
    fn recv(&mut self, _ctx: &mut UnitContext<'_>, _event: &Event<'_>) -> Result<(), UnitError> {
        Ok(())
    }

    /// Returns internal state to its initial condition.
    ///
    /// Variables have already been restored to their defaults when this runs.
    fn reset(&mut self, _ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        Ok(())
    }

    /// Saves (`save == true`) or restores persistent state.
    fn store(&mut self, _ctx: &mut UnitContext<'_>, _save: bool) -> Result<(), UnitError> {
        Ok(())
    }

    /// Releases resources before the instance is dropped.
    fn free(&mut self) {}
}

/// Error raised by a unit.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit addressed a variable it does not have.
    #[error("variable {0} not found")]
    VarNotFound(VarId),
    /// Two variables with the same label were declared.
    #[error("variable '{0}' declared twice")]
    DuplicateVar(String),
    /// A value could not be represented in the variable's type.
    #[error("value does not fit variable {var} of type {ty}")]
    TypeMismatch {
        /// Variable written or read.
        var: VarId,
        /// Its declared type.
        ty: VarType,
    },
    /// Audio access on a variable without the matching buffer.
    #[error("variable {0} has no audio buffer of that kind")]
    NoBuffer(VarId),
    /// An audio input reads the very buffer being written.
    #[error("audio input {input} aliases output {output}")]
    FeedbackLoop {
        /// Input variable.
        input: VarId,
        /// Output variable.
        output: VarId,
    },
    /// A constructor argument was rejected.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArg {
        /// Argument name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// View of one instance handed to [`Unit`] methods.
pub struct UnitContext<'a> {
    pub(crate) id: InstanceId,
    pub(crate) vars: &'a mut VarSet,
    pub(crate) pool: &'a mut BufferPool,
    pub(crate) writes: &'a mut Vec<(InstanceId, VarId, Value)>,
    pub(crate) config: GraphConfig,
    pub(crate) cycle: u64,
}

impl UnitContext<'_> {
    /// Id of the instance being driven.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Engine sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    /// Frames per cycle.
    pub fn frames(&self) -> usize {
        self.config.frames_per_cycle
    }

    /// Number of the cycle in progress (1-based, 0 outside a cycle).
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Looks up one of this instance's variables.
    pub fn var(&self, var: VarId) -> Result<&Var, UnitError> {
        self.vars.get(var).ok_or(UnitError::VarNotFound(var))
    }

    /// Finds a variable by label.
    pub fn find(&self, label: &str) -> Option<VarId> {
        self.vars.find(label)
    }

    /// Current value of a control variable.
    pub fn value(&self, var: VarId) -> Result<&Value, UnitError> {
        let v = self.var(var)?;
        v.value().ok_or(UnitError::TypeMismatch { var, ty: v.ty })
    }

    /// Control variable as `f64`.
    pub fn get_f64(&self, var: VarId) -> Result<f64, UnitError> {
        let value = self.value(var)?;
        value.as_f64().ok_or(UnitError::TypeMismatch {
            var,
            ty: value.var_type(),
        })
    }

    /// Control variable as `f32`.
    pub fn get_f32(&self, var: VarId) -> Result<f32, UnitError> {
        self.get_f64(var).map(|v| v as f32)
    }

    /// Control variable as `i32` (saturating).
    pub fn get_i32(&self, var: VarId) -> Result<i32, UnitError> {
        self.get_f64(var).map(|v| v as i32)
    }

    /// Control variable as `u32` (saturating).
    pub fn get_u32(&self, var: VarId) -> Result<u32, UnitError> {
        self.get_f64(var).map(|v| v as u32)
    }

    /// Control variable as `bool`.
    pub fn get_bool(&self, var: VarId) -> Result<bool, UnitError> {
        self.get_f64(var).map(|v| v != 0.0)
    }

    /// Writes a control variable, converting to its declared type.
    ///
    /// Writes to variables with callbacks or network connections are queued
    /// and routed by the graph once this unit returns.
    pub fn set(&mut self, var: VarId, value: impl Into<Value>) -> Result<(), UnitError> {
        let value = value.into();
        let v = self.vars.get_mut(var).ok_or(UnitError::VarNotFound(var))?;
        if v.ty.is_audio() {
            return Err(UnitError::TypeMismatch { var, ty: v.ty });
        }
        let converted = value
            .convert(v.ty)
            .ok_or(UnitError::TypeMismatch { var, ty: v.ty })?;
        if v.is_routed() {
            self.writes.push((self.id, var, converted.clone()));
        }
        v.storage = Storage::Value(converted);
        Ok(())
    }

    /// Audio read access. Unconnected inputs read as silence.
    pub fn audio(&self, var: VarId) -> Result<&AudioBuffer, UnitError> {
        let id = self.var(var)?.buffer_id().ok_or(UnitError::NoBuffer(var))?;
        Ok(self.pool.read(id))
    }

    /// Audio write access to an owned output buffer.
    pub fn audio_out(&mut self, var: VarId) -> Result<&mut AudioBuffer, UnitError> {
        let v = self.vars.get(var).ok_or(UnitError::VarNotFound(var))?;
        let Storage::Buffer(owned) = &v.storage else {
            return Err(UnitError::NoBuffer(var));
        };
        self.pool.write(owned).ok_or(UnitError::NoBuffer(var))
    }

    /// Reads `input` while writing `output` in one borrow.
    pub fn audio_io(
        &mut self,
        input: VarId,
        output: VarId,
    ) -> Result<(&AudioBuffer, &mut AudioBuffer), UnitError> {
        let read = self
            .vars
            .get(input)
            .ok_or(UnitError::VarNotFound(input))?
            .buffer_id()
            .ok_or(UnitError::NoBuffer(input))?;
        let v = self.vars.get(output).ok_or(UnitError::VarNotFound(output))?;
        let Storage::Buffer(owned) = &v.storage else {
            return Err(UnitError::NoBuffer(output));
        };
        self.pool
            .pair(read, owned)
            .ok_or(UnitError::FeedbackLoop { input, output })
    }
}

/// Declaration API handed to a class factory.
pub struct AllocContext<'a> {
    id: InstanceId,
    config: GraphConfig,
    vars: VarSet,
    pool: &'a mut BufferPool,
    symbols: &'a mut SymbolTable,
    exec_enabled: bool,
    subscriptions: Vec<SymbolId>,
}

/// What an [`AllocContext`] produced.
pub(crate) struct Declared {
    pub vars: VarSet,
    pub exec_enabled: bool,
    pub subscriptions: Vec<SymbolId>,
}

impl<'a> AllocContext<'a> {
    pub(crate) fn new(
        id: InstanceId,
        config: GraphConfig,
        pool: &'a mut BufferPool,
        symbols: &'a mut SymbolTable,
    ) -> Self {
        Self {
            id,
            config,
            vars: VarSet::default(),
            pool,
            symbols,
            exec_enabled: true,
            subscriptions: Vec::new(),
        }
    }

    /// Id the new instance will receive.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Engine sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    /// Frames per cycle.
    pub fn frames(&self) -> usize {
        self.config.frames_per_cycle
    }

    fn declare(
        &mut self,
        label: &str,
        dir: Direction,
        ty: VarType,
        storage: Storage,
        default: Option<Value>,
    ) -> Result<VarId, UnitError> {
        if self.vars.find(label).is_some() {
            return Err(UnitError::DuplicateVar(label.to_owned()));
        }
        Ok(self.vars.push(Var {
            label: label.to_owned(),
            dir,
            ty,
            storage,
            default,
            subscribers: Vec::new(),
            remote: false,
        }))
    }

    fn control(
        &mut self,
        label: &str,
        dir: Direction,
        default: Value,
    ) -> Result<VarId, UnitError> {
        let ty = default.var_type();
        self.declare(
            label,
            dir,
            ty,
            Storage::Value(default.clone()),
            Some(default),
        )
    }

    /// Declares a control input. Its type is the type of `default`.
    pub fn input(&mut self, label: &str, default: impl Into<Value>) -> Result<VarId, UnitError> {
        self.control(label, Direction::In, default.into())
    }

    /// Declares a control output. Its type is the type of `default`.
    pub fn output(&mut self, label: &str, default: impl Into<Value>) -> Result<VarId, UnitError> {
        self.control(label, Direction::Out, default.into())
    }

    /// Declares an audio input, initially unconnected.
    pub fn audio_input(&mut self, label: &str) -> Result<VarId, UnitError> {
        self.declare(
            label,
            Direction::In,
            VarType::Audio,
            Storage::Unconnected,
            None,
        )
    }

    /// Declares an audio output owning a fresh buffer.
    pub fn audio_output(&mut self, label: &str, channels: usize) -> Result<VarId, UnitError> {
        if self.vars.find(label).is_some() {
            return Err(UnitError::DuplicateVar(label.to_owned()));
        }
        let owned = self.pool.allocate(channels);
        self.declare(
            label,
            Direction::Out,
            VarType::Audio,
            Storage::Buffer(owned),
            None,
        )
    }

    /// Excludes the instance from the per-cycle exec sweep.
    pub fn disable_exec(&mut self) {
        self.exec_enabled = false;
    }

    /// Subscribes the instance to a broadcast attribute such as `_midi`.
    pub fn subscribe(&mut self, attr: &str) {
        let sym = self.symbols.intern(attr);
        if !self.subscriptions.contains(&sym) {
            self.subscriptions.push(sym);
        }
    }

    pub(crate) fn finish(self) -> Declared {
        Declared {
            vars: self.vars,
            exec_enabled: self.exec_enabled,
            subscriptions: self.subscriptions,
        }
    }
}

/// Named constructor arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: BTreeMap<String, Value>,
}

impl Args {
    /// Creates an empty argument set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets an argument, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_owned(), value.into());
    }

    /// Raw argument value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Iterates arguments in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no arguments were given.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn typed(&self, name: &str, ty: VarType) -> Result<Option<Value>, UnitError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(v) => v.convert(ty).map(Some).ok_or_else(|| UnitError::InvalidArg {
                name: name.to_owned(),
                reason: format!("expected {ty}, got '{v}'"),
            }),
        }
    }

    /// `f32` argument or `default` when absent.
    pub fn f32_or(&self, name: &str, default: f32) -> Result<f32, UnitError> {
        Ok(match self.typed(name, VarType::Float)? {
            Some(Value::Float(v)) => v,
            _ => default,
        })
    }

    /// `f64` argument or `default` when absent.
    pub fn f64_or(&self, name: &str, default: f64) -> Result<f64, UnitError> {
        Ok(match self.typed(name, VarType::Double)? {
            Some(Value::Double(v)) => v,
            _ => default,
        })
    }

    /// `i32` argument or `default` when absent.
    pub fn i32_or(&self, name: &str, default: i32) -> Result<i32, UnitError> {
        Ok(match self.typed(name, VarType::Int)? {
            Some(Value::Int(v)) => v,
            _ => default,
        })
    }

    /// `u32` argument or `default` when absent.
    pub fn u32_or(&self, name: &str, default: u32) -> Result<u32, UnitError> {
        Ok(match self.typed(name, VarType::UInt)? {
            Some(Value::UInt(v)) => v,
            _ => default,
        })
    }

    /// `bool` argument or `default` when absent.
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, UnitError> {
        Ok(match self.typed(name, VarType::Bool)? {
            Some(Value::Bool(v)) => v,
            _ => default,
        })
    }

    /// String argument or `default` when absent.
    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }
}
