//! Instance variables.
//!
//! Each instance declares an ordered [`VarSet`] at allocation time. A
//! variable's [`VarId`] is its position in that set and never changes until
//! the instance is freed.

use std::fmt;

use crate::buffer::{BufferId, BufferPool, BufferView, OwnedBuffer};
use crate::graph::InstanceId;
use crate::value::{Value, VarType};

/// Position of a variable within its instance's [`VarSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) u32);

impl VarId {
    /// Returns the raw position.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var#{}", self.0)
    }
}

/// Data direction of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Written by the outside world, read by the unit.
    In,
    /// Written by the unit.
    Out,
}

/// Where a variable's data lives.
#[derive(Debug)]
pub enum Storage {
    /// Control-rate value owned by the variable.
    Value(Value),
    /// Audio buffer owned by the variable (audio outputs).
    Buffer(OwnedBuffer),
    /// Alias of another variable's buffer (connected audio inputs).
    Proxy(BufferView),
    /// Audio input with no source; reads as silence.
    Unconnected,
}

/// Destination of a control-rate callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscriber {
    /// Receiving instance.
    pub inst: InstanceId,
    /// Receiving variable.
    pub var: VarId,
}

/// One declared variable.
#[derive(Debug)]
pub struct Var {
    pub(crate) label: String,
    pub(crate) dir: Direction,
    pub(crate) ty: VarType,
    pub(crate) storage: Storage,
    pub(crate) default: Option<Value>,
    pub(crate) subscribers: Vec<Subscriber>,
    pub(crate) remote: bool,
}

impl Var {
    /// Variable label, unique within its instance.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Data direction.
    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// Type tag.
    pub fn var_type(&self) -> VarType {
        self.ty
    }

    /// Current storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Current control value, `None` for audio variables.
    pub fn value(&self) -> Option<&Value> {
        match &self.storage {
            Storage::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Declared default, restored on reset.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Callback targets in registration order.
    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    /// True if writes are forwarded over the network.
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Buffer slot this variable reads or writes, if it is audio.
    pub fn buffer_id(&self) -> Option<BufferId> {
        match &self.storage {
            Storage::Buffer(owned) => Some(owned.id()),
            Storage::Proxy(view) => Some(view.id()),
            Storage::Unconnected => Some(BufferId::SILENCE),
            Storage::Value(_) => None,
        }
    }

    /// True if writes to this variable must be routed somewhere.
    #[inline]
    pub(crate) fn is_routed(&self) -> bool {
        self.remote || !self.subscribers.is_empty()
    }
}

/// Ordered variables of one instance.
#[derive(Debug, Default)]
pub struct VarSet {
    vars: Vec<Var>,
}

impl VarSet {
    pub(crate) fn push(&mut self, var: Var) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(var);
        id
    }

    /// Returns a variable by id.
    pub fn get(&self, id: VarId) -> Option<&Var> {
        self.vars.get(id.0 as usize)
    }

    pub(crate) fn get_mut(&mut self, id: VarId) -> Option<&mut Var> {
        self.vars.get_mut(id.0 as usize)
    }

    /// Finds a variable by label.
    pub fn find(&self, label: &str) -> Option<VarId> {
        self.vars
            .iter()
            .position(|v| v.label == label)
            .map(|i| VarId(i as u32))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if the instance declared no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates variables in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Var)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }

    /// Restores declared defaults and silences owned audio buffers.
    ///
    /// Connections (proxies, subscribers, remote flags) are structural and
    /// survive.
    pub(crate) fn restore_defaults(&mut self, pool: &mut BufferPool) {
        for var in &mut self.vars {
            if let Storage::Buffer(owned) = &var.storage {
                if let Some(buf) = pool.write(owned) {
                    buf.clear();
                }
            } else if matches!(var.storage, Storage::Value(_))
                && let Some(default) = &var.default
            {
                var.storage = Storage::Value(default.clone());
            }
        }
    }
}
