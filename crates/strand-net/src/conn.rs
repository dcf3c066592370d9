//! Cross-node connection bookkeeping.
//!
//! A [`SrcConn`] lives on the node that owns the source variable and names its
//! target symbolically until the handshake binds it to a [`DstId`]. A
//! [`DstConn`] lives on the target node and maps that id back to a local
//! instance variable.

use std::collections::HashMap;

use strand_core::{Graph, InstanceId, VarId, VarType};

use crate::error::{NetError, Result};
use crate::transport::NodeId;

/// Sequence number of a [`SrcConn`] on its owning node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SrcId(pub u32);

/// Sequence number of a [`DstConn`] on its owning node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DstId(pub u32);

impl std::fmt::Display for SrcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

impl std::fmt::Display for DstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dst#{}", self.0)
    }
}

/// Outbound end of a network connection.
#[derive(Debug, Clone)]
pub struct SrcConn {
    /// Id on this node.
    pub src_id: SrcId,
    /// Local source instance.
    pub inst: InstanceId,
    /// Local source variable.
    pub var: VarId,
    /// Node holding the target.
    pub node: NodeId,
    /// Target instance label on `node`.
    pub dst_inst: String,
    /// Target variable label on `node`.
    pub dst_var: String,
    /// Bound id on `node`, `None` until the handshake resolves it.
    pub dst_id: Option<DstId>,
}

/// Inbound end of a network connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstConn {
    /// Id on this node.
    pub dst_id: DstId,
    /// Node holding the source.
    pub node: NodeId,
    /// Source id on `node`.
    pub src_id: SrcId,
    /// Local target instance.
    pub inst: InstanceId,
    /// Local target variable.
    pub var: VarId,
}

#[derive(Debug)]
struct Entry {
    id: InstanceId,
    vars: HashMap<String, (VarId, VarType)>,
}

/// Label index of a loaded graph.
///
/// Built once per sync so the worker thread can resolve `ConnRequest`s
/// without touching the graph itself.
#[derive(Debug, Default)]
pub struct Directory {
    instances: HashMap<String, Entry>,
}

impl Directory {
    /// Indexes every instance and variable label of `graph`.
    pub fn snapshot(graph: &Graph) -> Self {
        let instances = graph
            .instances()
            .map(|inst| {
                let vars = inst
                    .vars()
                    .iter()
                    .map(|(id, v)| (v.label().to_owned(), (id, v.var_type())))
                    .collect();
                (
                    inst.label().to_owned(),
                    Entry {
                        id: inst.id(),
                        vars,
                    },
                )
            })
            .collect();
        Self { instances }
    }

    /// Resolves a network target.
    ///
    /// Audio variables cannot receive events and are rejected with a type
    /// error.
    pub fn resolve(&self, inst: &str, var: &str) -> Result<(InstanceId, VarId)> {
        let entry = self
            .instances
            .get(inst)
            .ok_or_else(|| strand_core::Error::InstanceNotFound(inst.to_owned()))?;
        let &(id, ty) = entry.vars.get(var).ok_or_else(|| {
            strand_core::Error::VariableNotFound {
                instance: inst.to_owned(),
                var: var.to_owned(),
            }
        })?;
        if ty.is_audio() {
            return Err(NetError::Graph(strand_core::Error::VariableTypeError {
                instance: inst.to_owned(),
                var: var.to_owned(),
                reason: "audio variables cannot receive network events",
            }));
        }
        Ok((entry.id, id))
    }

    /// Number of indexed instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Connection lists of one node, frozen after a successful handshake.
#[derive(Debug, Default)]
pub struct ConnTable {
    src: Vec<SrcConn>,
    dst: Vec<DstConn>,
    dst_index: HashMap<(NodeId, SrcId), DstId>,
    by_var: HashMap<(InstanceId, VarId), Vec<usize>>,
    frozen: bool,
}

impl ConnTable {
    /// Appends an unresolved outbound connection.
    pub(crate) fn add_src(
        &mut self,
        inst: InstanceId,
        var: VarId,
        node: NodeId,
        dst_inst: &str,
        dst_var: &str,
    ) -> SrcId {
        let src_id = SrcId(self.src.len() as u32);
        self.src.push(SrcConn {
            src_id,
            inst,
            var,
            node,
            dst_inst: dst_inst.to_owned(),
            dst_var: dst_var.to_owned(),
            dst_id: None,
        });
        src_id
    }

    /// Returns the existing binding for `(node, src_id)`, or creates one
    /// unless the table is frozen.
    pub(crate) fn bind(
        &mut self,
        node: NodeId,
        src_id: SrcId,
        target: (InstanceId, VarId),
    ) -> Option<DstId> {
        if let Some(&dst_id) = self.dst_index.get(&(node, src_id)) {
            return Some(dst_id);
        }
        if self.frozen {
            return None;
        }
        let dst_id = DstId(self.dst.len() as u32);
        self.dst.push(DstConn {
            dst_id,
            node,
            src_id,
            inst: target.0,
            var: target.1,
        });
        self.dst_index.insert((node, src_id), dst_id);
        Some(dst_id)
    }

    /// Existing binding for `(node, src_id)`.
    pub fn binding(&self, node: NodeId, src_id: SrcId) -> Option<DstId> {
        self.dst_index.get(&(node, src_id)).copied()
    }

    pub(crate) fn src_mut(&mut self, src_id: SrcId) -> Option<&mut SrcConn> {
        self.src.get_mut(src_id.0 as usize)
    }

    /// Outbound connections in declaration order.
    pub fn src_conns(&self) -> &[SrcConn] {
        &self.src
    }

    /// Inbound connections in binding order.
    pub fn dst_conns(&self) -> &[DstConn] {
        &self.dst
    }

    /// Inbound connection by id.
    pub fn dst(&self, dst_id: DstId) -> Option<&DstConn> {
        self.dst.get(dst_id.0 as usize)
    }

    /// Unresolved outbound connections targeting `node`.
    pub fn unresolved_for(&self, node: NodeId) -> impl Iterator<Item = &SrcConn> {
        self.src
            .iter()
            .filter(move |c| c.node == node && c.dst_id.is_none())
    }

    /// Returns `true` when every outbound connection has a dst id.
    pub fn all_resolved(&self) -> bool {
        self.src.iter().all(|c| c.dst_id.is_some())
    }

    /// Seals the table and indexes outbound connections by source variable.
    pub(crate) fn freeze(&mut self) {
        self.by_var.clear();
        for (i, conn) in self.src.iter().enumerate() {
            self.by_var.entry((conn.inst, conn.var)).or_default().push(i);
        }
        self.frozen = true;
    }

    /// Returns `true` once [`freeze`](Self::freeze) has run.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Bound outbound connections fed by a source variable.
    pub fn targets(&self, inst: InstanceId, var: VarId) -> impl Iterator<Item = (NodeId, DstId)> {
        self.by_var
            .get(&(inst, var))
            .into_iter()
            .flatten()
            .filter_map(|&i| self.src.get(i))
            .filter_map(|c| c.dst_id.map(|d| (c.node, d)))
    }

    /// Drops every connection and unfreezes.
    pub(crate) fn clear(&mut self) {
        self.src.clear();
        self.dst.clear();
        self.dst_index.clear();
        self.by_var.clear();
        self.frozen = false;
    }
}
