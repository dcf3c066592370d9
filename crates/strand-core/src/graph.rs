//! The instance graph.
//!
//! A [`Graph`] is built during Load (allocate instances, connect audio,
//! install callbacks), sealed with [`Graph::finish_load`], driven once per
//! audio block by [`Graph::execute_cycle`], and torn down by
//! [`Graph::unload`]. Instances live in an append-only `Vec` indexed by
//! [`InstanceId`]; exec order is registration order.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_core::{Args, Graph, GraphConfig};
//!
//! let mut graph = Graph::new(registry, GraphConfig::default());
//! let osc = graph.allocate_instance("sine", Some("osc"), &Args::new())?;
//! let amp = graph.allocate_instance("gain", None, &Args::new())?;
//! let (_, out) = graph.resolve("osc", "out")?;
//! let (_, input) = graph.resolve("gain0", "in")?;
//! graph.connect_audio(osc, out, amp, input)?;
//! graph.finish_load()?;
//!
//! loop {
//!     graph.execute_cycle()?;
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::buffer::{AudioBuffer, BufferPool};
use crate::error::{Error, Result};
use crate::event::{Event, EventFlags, Message, Payload};
use crate::registry::{ClassId, ClassRegistry};
use crate::scheduler::{CycleStats, ExecFailure};
use crate::symbol::{MIDI_SYMBOL, RESET_SYMBOL, SymbolId, SymbolTable};
use crate::unit::{AllocContext, Args, Unit, UnitContext, UnitError};
use crate::value::Value;
use crate::var::{Direction, Storage, Subscriber, Var, VarId, VarSet};

/// Identifier of an instance within one Load.
///
/// Assigned sequentially and never reused until the graph is unloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u32);

impl InstanceId {
    /// Returns the raw sequence number.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst#{}", self.0)
    }
}

/// Engine parameters fixed for the lifetime of a graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphConfig {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Frames processed per cycle.
    pub frames_per_cycle: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            frames_per_cycle: 256,
        }
    }
}

/// A live object of some class.
pub struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) class: ClassId,
    pub(crate) class_label: &'static str,
    pub(crate) label: String,
    pub(crate) symbol: SymbolId,
    pub(crate) vars: VarSet,
    pub(crate) exec_enabled: bool,
    pub(crate) subscriptions: Vec<SymbolId>,
    pub(crate) unit: Box<dyn Unit>,
}

impl Instance {
    /// Instance id.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Class the instance was allocated from.
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Label of that class.
    pub fn class_label(&self) -> &'static str {
        self.class_label
    }

    /// Instance label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Interned instance label.
    pub fn symbol(&self) -> SymbolId {
        self.symbol
    }

    /// Declared variables.
    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    /// True if the instance takes part in the exec sweep.
    pub fn exec_enabled(&self) -> bool {
        self.exec_enabled
    }

    /// True if the instance subscribed to a broadcast attribute.
    pub fn is_subscribed(&self, attr: SymbolId) -> bool {
        self.subscriptions.contains(&attr)
    }
}

/// Instance graph and execution state.
pub struct Graph {
    registry: Arc<ClassRegistry>,
    config: GraphConfig,
    symbols: SymbolTable,
    pub(crate) instances: Vec<Instance>,
    by_symbol: HashMap<SymbolId, InstanceId>,
    pub(crate) pool: BufferPool,
    pub(crate) writes: Vec<(InstanceId, VarId, Value)>,
    pub(crate) outbox: Vec<(InstanceId, VarId, Value)>,
    pub(crate) failures: Vec<ExecFailure>,
    pub(crate) stats: CycleStats,
    pub(crate) cycle: u64,
    loaded: bool,
    midi_sym: SymbolId,
    reset_sym: SymbolId,
}

impl Graph {
    /// Creates an empty graph over a class registry.
    pub fn new(registry: Arc<ClassRegistry>, config: GraphConfig) -> Self {
        let mut symbols = SymbolTable::new();
        let midi_sym = symbols.intern(MIDI_SYMBOL);
        let reset_sym = symbols.intern(RESET_SYMBOL);
        Self {
            registry,
            config,
            symbols,
            instances: Vec::new(),
            by_symbol: HashMap::new(),
            pool: BufferPool::new(config.frames_per_cycle),
            writes: Vec::new(),
            outbox: Vec::new(),
            failures: Vec::new(),
            stats: CycleStats::default(),
            cycle: 0,
            loaded: false,
            midi_sym,
            reset_sym,
        }
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    /// Allocates an instance of `class_label`.
    ///
    /// With no label, `"{class}{n}"` is generated using the smallest `n` not
    /// already naming a live instance. A failing factory leaves no trace: the
    /// instance list is untouched and buffers it declared are released.
    pub fn allocate_instance(
        &mut self,
        class_label: &str,
        label: Option<&str>,
        args: &Args,
    ) -> Result<InstanceId> {
        if self.loaded {
            return Err(Error::GraphLoaded);
        }
        let class = self
            .registry
            .find(class_label)
            .ok_or_else(|| Error::ClassNotFound(class_label.to_owned()))?;
        let (static_label, factory) =
            match (self.registry.descriptor(class), self.registry.factory(class)) {
                (Some(d), Some(f)) => (d.label, f),
                _ => return Err(Error::ClassNotFound(class_label.to_owned())),
            };
        let label = match label {
            Some(l) if self.label_in_use(l) => {
                return Err(Error::DuplicateInstanceLabel(l.to_owned()));
            }
            Some(l) => l.to_owned(),
            None => self.auto_label(class_label),
        };

        let id = InstanceId(self.instances.len() as u32);
        let mark = self.pool.mark();
        let mut ctx = AllocContext::new(id, self.config, &mut self.pool, &mut self.symbols);
        let built = factory(&mut ctx, args);
        let declared = ctx.finish();
        let unit = match built {
            Ok(unit) => unit,
            Err(source) => {
                self.pool.rollback(mark);
                #[cfg(feature = "tracing")]
                tracing::warn!("graph_alloc: {class_label} '{label}' refused: {source}");
                return Err(Error::AllocInstanceFailed {
                    class: class_label.to_owned(),
                    source,
                });
            }
        };

        let symbol = self.symbols.intern(&label);
        self.by_symbol.insert(symbol, id);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_alloc: {id} '{label}' of class {class_label}");
        self.instances.push(Instance {
            id,
            class,
            class_label: static_label,
            label,
            symbol,
            vars: declared.vars,
            exec_enabled: declared.exec_enabled,
            subscriptions: declared.subscriptions,
            unit,
        });
        Ok(id)
    }

    fn label_in_use(&self, label: &str) -> bool {
        self.symbols
            .lookup(label)
            .is_some_and(|sym| self.by_symbol.contains_key(&sym))
    }

    fn auto_label(&self, class_label: &str) -> String {
        let mut n = 0_usize;
        loop {
            let candidate = format!("{class_label}{n}");
            if !self.label_in_use(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Makes `dst_var` read the buffer owned by `src_var`.
    ///
    /// The source must be an audio output owning a buffer, the destination an
    /// audio input. Nothing is copied or allocated; on error nothing changes.
    pub fn connect_audio(
        &mut self,
        src_inst: InstanceId,
        src_var: VarId,
        dst_inst: InstanceId,
        dst_var: VarId,
    ) -> Result<()> {
        if self.loaded {
            return Err(Error::GraphLoaded);
        }
        let src = self.var_ref(src_inst, src_var)?;
        let view = match (src.dir, &src.storage) {
            (Direction::Out, Storage::Buffer(owned)) => owned.view(),
            _ => {
                return Err(self.type_error(src_inst, src_var, "source must be an audio output"));
            }
        };
        let dst = self.var_ref(dst_inst, dst_var)?;
        if dst.dir != Direction::In || !dst.ty.is_audio() {
            return Err(self.type_error(dst_inst, dst_var, "destination must be an audio input"));
        }
        self.var_mut(dst_inst, dst_var)?.storage = Storage::Proxy(view);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_connect: {src_inst}.{src_var} → {dst_inst}.{dst_var}");
        Ok(())
    }

    /// Subscribes `dst_var` to every value written to `src_var`.
    ///
    /// Fan-out is allowed; delivery follows registration order. Neither
    /// variable may be audio.
    pub fn install_callback(
        &mut self,
        src_inst: InstanceId,
        src_var: VarId,
        dst_inst: InstanceId,
        dst_var: VarId,
    ) -> Result<()> {
        if self.loaded {
            return Err(Error::GraphLoaded);
        }
        if self.var_ref(src_inst, src_var)?.ty.is_audio() {
            return Err(self.type_error(src_inst, src_var, "callbacks carry control values only"));
        }
        if self.var_ref(dst_inst, dst_var)?.ty.is_audio() {
            return Err(self.type_error(dst_inst, dst_var, "callbacks carry control values only"));
        }
        self.var_mut(src_inst, src_var)?
            .subscribers
            .push(Subscriber {
                inst: dst_inst,
                var: dst_var,
            });
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_callback: {src_inst}.{src_var} → {dst_inst}.{dst_var}");
        Ok(())
    }

    /// Flags a control output as having network connections.
    ///
    /// Values written to it are queued in the outbox for the network layer.
    pub fn mark_remote(&mut self, inst: InstanceId, var: VarId) -> Result<()> {
        if self.loaded {
            return Err(Error::GraphLoaded);
        }
        let v = self.var_ref(inst, var)?;
        if v.dir != Direction::Out || v.ty.is_audio() {
            return Err(self.type_error(inst, var, "remote sources must be control outputs"));
        }
        self.var_mut(inst, var)?.remote = true;
        Ok(())
    }

    /// Seals the instance list and pre-allocates the routing queues.
    pub fn finish_load(&mut self) -> Result<()> {
        if self.loaded {
            return Err(Error::GraphLoaded);
        }
        let var_count: usize = self.instances.iter().map(|i| i.vars.len()).sum();
        self.writes.reserve(var_count.max(16));
        self.outbox.reserve(var_count.max(16));
        self.failures.reserve(self.instances.len().max(4));
        self.loaded = true;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "graph_load: {} instances, {} buffers",
            self.instances.len(),
            self.pool.len()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Handles a host message.
    ///
    /// Returns `Ok(false)` for messages that are not for the graph (network
    /// datagrams, unknown selectors).
    pub fn dispatch(&mut self, message: &Message<'_>) -> Result<bool> {
        match *message {
            Message::Ui { inst, var, value } => {
                let (value, _) = Value::decode(value)?;
                self.deliver(inst, var, &value, EventFlags::UI)?;
                Ok(true)
            }
            Message::Midi(msgs) => {
                self.broadcast_with(
                    self.midi_sym,
                    Payload::Midi(msgs),
                    EventFlags::MIDI.union(EventFlags::BROADCAST),
                )?;
                Ok(true)
            }
            Message::Net { .. } | Message::Unknown(_) => Ok(false),
        }
    }

    /// Stores `value` into a variable, calls the instance's `recv`, and routes
    /// whatever that writes.
    pub fn deliver(
        &mut self,
        inst: InstanceId,
        var: VarId,
        value: &Value,
        flags: EventFlags,
    ) -> Result<()> {
        self.deliver_from(None, inst, var, value, flags)?;
        self.route_pending();
        self.take_failure()
    }

    pub(crate) fn deliver_from(
        &mut self,
        src: Option<(InstanceId, VarId)>,
        inst: InstanceId,
        var: VarId,
        value: &Value,
        flags: EventFlags,
    ) -> Result<()> {
        let target = self.var_ref(inst, var)?;
        if target.ty.is_audio() {
            return Err(self.type_error(inst, var, "audio variables do not take values"));
        }
        let converted = value
            .convert(target.ty)
            .ok_or_else(|| self.type_error(inst, var, "value cannot be converted"))?;

        let config = self.config;
        let cycle = self.cycle;
        let Some(instance) = self.instances.get_mut(inst.0 as usize) else {
            return Err(Error::InstanceNotFound(inst.to_string()));
        };
        if let Some(v) = instance.vars.get_mut(var) {
            v.storage = Storage::Value(converted.clone());
        }
        let event = Event {
            flags,
            src_inst: src.map(|s| s.0),
            src_var: src.map(|s| s.1),
            dst_var: Some(var),
            payload: Payload::Value(&converted),
        };
        let mut ctx = UnitContext {
            id: inst,
            vars: &mut instance.vars,
            pool: &mut self.pool,
            writes: &mut self.writes,
            config,
            cycle,
        };
        instance
            .unit
            .recv(&mut ctx, &event)
            .map_err(|source| Error::Unit {
                instance: inst,
                source,
            })
    }

    /// Sends `payload` to every instance subscribed to `attr`.
    ///
    /// Every subscriber is called; the first failure is returned.
    pub fn broadcast(&mut self, attr: SymbolId, payload: Payload<'_>) -> Result<()> {
        self.broadcast_with(attr, payload, EventFlags::BROADCAST)
    }

    fn broadcast_with(
        &mut self,
        attr: SymbolId,
        payload: Payload<'_>,
        flags: EventFlags,
    ) -> Result<()> {
        let config = self.config;
        let cycle = self.cycle;
        let mut first = None;
        for instance in &mut self.instances {
            if !instance.subscriptions.contains(&attr) {
                continue;
            }
            let event = Event {
                flags,
                src_inst: None,
                src_var: None,
                dst_var: None,
                payload,
            };
            let mut ctx = UnitContext {
                id: instance.id,
                vars: &mut instance.vars,
                pool: &mut self.pool,
                writes: &mut self.writes,
                config,
                cycle,
            };
            if let Err(source) = instance.unit.recv(&mut ctx, &event)
                && first.is_none()
            {
                first = Some(Error::Unit {
                    instance: instance.id,
                    source,
                });
            }
        }
        self.route_pending();
        if let Some(err) = first {
            self.failures.clear();
            return Err(err);
        }
        self.take_failure()
    }

    pub(crate) fn take_failure(&mut self) -> Result<()> {
        let first = self.failures.drain(..).next();
        match first {
            Some(f) => Err(Error::Unit {
                instance: f.instance,
                source: f.error,
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn record_failure(&mut self, inst: InstanceId, err: Error) {
        let (instance, error) = match err {
            Error::Unit { instance, source } => (instance, source),
            other => (inst, UnitError::Failed(other.to_string())),
        };
        self.failures.push(ExecFailure { instance, error });
    }

    // ------------------------------------------------------------------
    // Reset / store / unload
    // ------------------------------------------------------------------

    /// Restores every variable's default, then resets each instance in list
    /// order. Only when every reset succeeded is `_reset` broadcast;
    /// otherwise the first failure is returned.
    pub fn reset(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }
        for instance in &mut self.instances {
            instance.vars.restore_defaults(&mut self.pool);
        }
        self.writes.clear();
        let config = self.config;
        let cycle = self.cycle;
        let mut first = None;
        for idx in 0..self.instances.len() {
            let instance = &mut self.instances[idx];
            let id = instance.id;
            let mut ctx = UnitContext {
                id,
                vars: &mut instance.vars,
                pool: &mut self.pool,
                writes: &mut self.writes,
                config,
                cycle,
            };
            match instance.unit.reset(&mut ctx) {
                Ok(()) => self.route_pending(),
                Err(source) => {
                    self.writes.clear();
                    #[cfg(feature = "tracing")]
                    tracing::warn!("graph_reset: {id} failed: {source}");
                    if first.is_none() {
                        first = Some(Error::Unit { instance: id, source });
                    }
                }
            }
        }
        if let Some(err) = first {
            return Err(err);
        }
        self.take_failure()?;
        self.broadcast_with(
            self.reset_sym,
            Payload::Symbol(self.reset_sym),
            EventFlags::BROADCAST,
        )
    }

    /// Calls `store(save)` on every instance in list order.
    pub fn store(&mut self, save: bool) -> Result<()> {
        if !self.loaded {
            return Err(Error::NotLoaded);
        }
        let config = self.config;
        let cycle = self.cycle;
        for idx in 0..self.instances.len() {
            let instance = &mut self.instances[idx];
            let id = instance.id;
            let mut ctx = UnitContext {
                id,
                vars: &mut instance.vars,
                pool: &mut self.pool,
                writes: &mut self.writes,
                config,
                cycle,
            };
            instance
                .unit
                .store(&mut ctx, save)
                .map_err(|source| Error::Unit { instance: id, source })?;
        }
        self.route_pending();
        self.take_failure()
    }

    /// Frees every instance in list order and clears all Load state.
    ///
    /// The symbol table survives.
    pub fn unload(&mut self) {
        for instance in &mut self.instances {
            instance.unit.free();
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_unload: {} instances", self.instances.len());
        self.instances.clear();
        self.by_symbol.clear();
        self.pool.release_all();
        self.writes.clear();
        self.outbox.clear();
        self.failures.clear();
        self.stats = CycleStats::default();
        self.cycle = 0;
        self.loaded = false;
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub(crate) fn var_ref(&self, inst: InstanceId, var: VarId) -> Result<&Var> {
        let instance = self
            .instances
            .get(inst.0 as usize)
            .ok_or_else(|| Error::InstanceNotFound(inst.to_string()))?;
        instance
            .vars
            .get(var)
            .ok_or_else(|| Error::VariableNotFound {
                instance: instance.label.clone(),
                var: var.to_string(),
            })
    }

    fn var_mut(&mut self, inst: InstanceId, var: VarId) -> Result<&mut Var> {
        let instance = self
            .instances
            .get_mut(inst.0 as usize)
            .ok_or_else(|| Error::InstanceNotFound(inst.to_string()))?;
        let label = &instance.label;
        instance
            .vars
            .get_mut(var)
            .ok_or_else(|| Error::VariableNotFound {
                instance: label.clone(),
                var: var.to_string(),
            })
    }

    fn type_error(&self, inst: InstanceId, var: VarId, reason: &'static str) -> Error {
        let instance = self.instances.get(inst.0 as usize);
        Error::VariableTypeError {
            instance: instance.map_or_else(|| inst.to_string(), |i| i.label.clone()),
            var: instance
                .and_then(|i| i.vars.get(var))
                .map_or_else(|| var.to_string(), |v| v.label.clone()),
            reason,
        }
    }

    /// Resolves an instance label.
    pub fn instance_id(&self, label: &str) -> Option<InstanceId> {
        let sym = self.symbols.lookup(label)?;
        self.by_symbol.get(&sym).copied()
    }

    /// Resolves `(instance label, variable label)` to ids.
    pub fn resolve(&self, inst_label: &str, var_label: &str) -> Result<(InstanceId, VarId)> {
        let inst = self
            .instance_id(inst_label)
            .ok_or_else(|| Error::InstanceNotFound(inst_label.to_owned()))?;
        let var = self
            .instances
            .get(inst.0 as usize)
            .and_then(|i| i.vars.find(var_label))
            .ok_or_else(|| Error::VariableNotFound {
                instance: inst_label.to_owned(),
                var: var_label.to_owned(),
            })?;
        Ok((inst, var))
    }

    /// Returns an instance by id.
    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0 as usize)
    }

    /// Iterates instances in exec order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if no instances are allocated.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Returns a variable.
    pub fn var(&self, inst: InstanceId, var: VarId) -> Option<&Var> {
        self.var_ref(inst, var).ok()
    }

    /// Current control value of a variable.
    pub fn value(&self, inst: InstanceId, var: VarId) -> Option<&Value> {
        self.var(inst, var).and_then(Var::value)
    }

    /// Audio buffer a variable reads or writes.
    pub fn audio(&self, inst: InstanceId, var: VarId) -> Option<&AudioBuffer> {
        let id = self.var(inst, var)?.buffer_id()?;
        Some(self.pool.read(id))
    }

    /// Passes every queued remote write to `f` and empties the queue.
    pub fn drain_outbox(&mut self, mut f: impl FnMut(InstanceId, VarId, &Value)) {
        for (inst, var, value) in self.outbox.drain(..) {
            f(inst, var, &value);
        }
    }

    /// Discards queued remote writes.
    pub fn clear_outbox(&mut self) {
        self.outbox.clear();
    }

    /// Class registry the graph allocates from.
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Engine parameters.
    pub fn config(&self) -> GraphConfig {
        self.config
    }

    /// Symbol table.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Mutable symbol table, for interning attribute labels.
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// True between [`finish_load`](Self::finish_load) and
    /// [`unload`](Self::unload).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}
