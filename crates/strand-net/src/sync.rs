//! Handshake state machine.
//!
//! [`SyncEngine`] turns symbolic cross-node connections into numeric id pairs.
//! It owns no thread and no socket: every call receives the transport it may
//! use, so the same engine runs inside the sync worker while the handshake is
//! pending and inside the session afterwards.
//!
//! ```text
//!        begin()            all resolved + all done
//!  Pre ──────────► Pending ─────────────────────────► Success
//!                    │
//!                    │ local error / peer Err / timeout / cancel
//!                    ▼
//!                   Fail
//! ```

use std::time::{Duration, Instant};

use strand_core::{InstanceId, VarId};

use crate::conn::{ConnTable, Directory, SrcId};
use crate::error::{NetError, Result};
use crate::transport::{Datagram, NodeId, Transport};
use crate::wire::{self, Packet};

/// Handshake state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// No network activity.
    Pre,
    /// Handshake in progress.
    Pending,
    /// Every connection is bound; maps are frozen.
    Success,
    /// The handshake failed; unload before retrying.
    Fail,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pre => "Pre",
            Self::Pending => "Pending",
            Self::Success => "Success",
            Self::Fail => "Fail",
        };
        f.write_str(name)
    }
}

/// Timing of the handshake.
///
/// ## Fields
///
/// - `poll_interval`: worker sleep between drains (default 5 ms)
/// - `retry_interval`: resend period for unanswered messages (default 250 ms)
/// - `timeout`: time allowed in Pending before failing (default 10 s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Worker sleep between polls.
    pub poll_interval: Duration,
    /// Resend period while Pending.
    pub retry_interval: Duration,
    /// Maximum time in Pending.
    pub timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            retry_interval: Duration::from_millis(250),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Handshake flags of one roster node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// A `Hello` has arrived from the node.
    pub hello: bool,
    /// The node has sent all of its requests for us.
    pub req_done: bool,
    /// The node has resolved everything it needs.
    pub done: bool,
    /// This entry is the local node.
    pub is_local: bool,
}

/// One roster entry.
#[derive(Debug, Clone)]
pub struct NetNode {
    /// Roster position.
    pub id: NodeId,
    /// Node label used by remote connection declarations.
    pub label: String,
    /// Handshake flags.
    pub flags: NodeFlags,
}

/// Per-session handshake state machine.
pub struct SyncEngine {
    local: NodeId,
    nodes: Vec<NetNode>,
    conns: ConnTable,
    directory: Directory,
    policy: SyncPolicy,
    state: SyncState,
    done_sent: bool,
    started: Option<Instant>,
    last_retry: Option<Instant>,
    failure: Option<NetError>,
    scratch: Vec<u8>,
    inbox: Vec<Datagram>,
}

impl SyncEngine {
    /// Creates an engine for `local` in a roster of node labels.
    ///
    /// Node ids are positions in `labels`.
    pub fn new(local: NodeId, labels: Vec<String>, policy: SyncPolicy) -> Result<Self> {
        if local.index() >= labels.len() {
            return Err(NetError::NetNodeNotFound(local.to_string()));
        }
        let nodes = labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| {
                let id = u16::try_from(i)
                    .map(NodeId)
                    .map_err(|_| NetError::NetNodeNotFound(label.clone()))?;
                Ok(NetNode {
                    id,
                    label,
                    flags: NodeFlags {
                        is_local: id == local,
                        ..NodeFlags::default()
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            local,
            nodes,
            conns: ConnTable::default(),
            directory: Directory::default(),
            policy,
            state: SyncState::Pre,
            done_sent: false,
            started: None,
            last_retry: None,
            failure: None,
            scratch: Vec::with_capacity(256),
            inbox: Vec::new(),
        })
    }

    /// Local node id.
    pub fn local(&self) -> NodeId {
        self.local
    }

    /// Roster in id order.
    pub fn nodes(&self) -> &[NetNode] {
        &self.nodes
    }

    /// Roster entry by id.
    pub fn node(&self, id: NodeId) -> Option<&NetNode> {
        self.nodes.get(id.index())
    }

    /// Looks up a node by label.
    pub fn node_id(&self, label: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.label == label).map(|n| n.id)
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Timing policy.
    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Connection lists.
    pub fn conns(&self) -> &ConnTable {
        &self.conns
    }

    /// Whether `Done` has been broadcast this session.
    pub fn done_sent(&self) -> bool {
        self.done_sent
    }

    /// Error that moved the engine to Fail.
    pub fn failure(&self) -> Option<&NetError> {
        self.failure.as_ref()
    }

    /// Takes the error that moved the engine to Fail.
    pub fn take_failure(&mut self) -> Option<NetError> {
        self.failure.take()
    }

    /// Declares an outbound connection to `(node, inst, var)`.
    pub fn add_src(
        &mut self,
        inst: InstanceId,
        var: VarId,
        node_label: &str,
        dst_inst: &str,
        dst_var: &str,
    ) -> Result<SrcId> {
        if self.state != SyncState::Pre {
            return Err(NetError::InvalidState {
                op: "declare a remote connection",
                state: self.state,
            });
        }
        let node = self
            .node_id(node_label)
            .ok_or_else(|| NetError::NetNodeNotFound(node_label.to_owned()))?;
        if node == self.local {
            return Err(NetError::LocalTarget(node_label.to_owned()));
        }
        if !wire::is_valid_label(dst_inst) || !wire::is_valid_label(dst_var) {
            return Err(wire::WireError::InvalidLabel.into());
        }
        Ok(self.conns.add_src(inst, var, node, dst_inst, dst_var))
    }

    /// Enters Pending and greets every peer.
    ///
    /// `directory` indexes the loaded graph for resolving incoming requests.
    pub fn begin(
        &mut self,
        transport: &mut dyn Transport,
        directory: Directory,
        now: Instant,
    ) -> Result<()> {
        if self.state != SyncState::Pre {
            return Err(NetError::InvalidState {
                op: "begin sync",
                state: self.state,
            });
        }
        self.directory = directory;
        self.started = Some(now);
        self.last_retry = Some(now);
        self.state = SyncState::Pending;
        tracing::info!(
            local = %self.local,
            nodes = self.nodes.len(),
            conns = self.conns.src_conns().len(),
            "sync started"
        );
        if let Err(err) = self.broadcast(transport, Packet::Hello { echo: true }) {
            self.fail(transport, err, true);
            return Ok(());
        }
        self.evaluate(transport);
        Ok(())
    }

    /// Drains the transport, advances the handshake, and applies the retry
    /// and timeout policy.
    pub fn poll(&mut self, transport: &mut dyn Transport, now: Instant) -> SyncState {
        if self.state != SyncState::Pending {
            return self.state;
        }
        let mut inbox = std::mem::take(&mut self.inbox);
        if let Err(err) = transport.drain_pending(&mut inbox) {
            self.fail(transport, err, true);
        }
        for datagram in inbox.drain(..) {
            if self.state != SyncState::Pending {
                break;
            }
            self.handle(transport, datagram.from, &datagram.bytes);
        }
        self.inbox = inbox;

        self.evaluate(transport);
        if self.state != SyncState::Pending {
            return self.state;
        }

        let elapsed = self.started.map_or(Duration::ZERO, |t| now.duration_since(t));
        if elapsed >= self.policy.timeout {
            self.fail(transport, NetError::SyncTimeout(elapsed), true);
        } else if self
            .last_retry
            .is_none_or(|t| now.duration_since(t) >= self.policy.retry_interval)
        {
            self.last_retry = Some(now);
            if let Err(err) = self.retry(transport) {
                self.fail(transport, err, true);
            }
        }
        self.state
    }

    /// Handles one sync datagram.
    ///
    /// In Pending this drives the handshake; in Success it answers
    /// stragglers from the frozen maps. `Evt`s are not handled here.
    pub fn handle(&mut self, transport: &mut dyn Transport, from: NodeId, bytes: &[u8]) {
        if !matches!(self.state, SyncState::Pending | SyncState::Success) {
            tracing::debug!(%from, state = %self.state, "ignoring sync datagram");
            return;
        }
        if from == self.local || from.index() >= self.nodes.len() {
            tracing::warn!(%from, "ignoring datagram from outside the roster");
            return;
        }
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::warn!(%from, %err, "dropping malformed datagram");
                return;
            }
        };
        tracing::trace!(%from, msg = packet.name(), "sync recv");
        if let Err(err) = self.respond(transport, from, packet) {
            self.fail(transport, err, true);
        }
    }

    /// Abandons a pending handshake and tells every peer.
    pub fn cancel(&mut self, transport: &mut dyn Transport) {
        if self.state == SyncState::Pending {
            self.fail(transport, NetError::Cancelled, true);
        }
    }

    /// Forgets every connection and flag and returns to Pre.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.flags = NodeFlags {
                is_local: node.flags.is_local,
                ..NodeFlags::default()
            };
        }
        self.conns.clear();
        self.directory = Directory::default();
        self.state = SyncState::Pre;
        self.done_sent = false;
        self.started = None;
        self.last_retry = None;
        self.failure = None;
        self.inbox.clear();
    }

    fn respond(
        &mut self,
        transport: &mut dyn Transport,
        from: NodeId,
        packet: Packet<'_>,
    ) -> Result<()> {
        let idx = from.index();
        match packet {
            Packet::Hello { echo } => {
                self.nodes[idx].flags.hello = true;
                if echo {
                    self.send(transport, from, Packet::Hello { echo: false })?;
                    self.send_requests(transport, from)?;
                    if self.done_sent {
                        self.send(transport, from, Packet::Done)?;
                    }
                }
            }
            Packet::ConnRequest { src_id, inst, var } => {
                let target = match self.directory.resolve(inst, var) {
                    Ok(target) => target,
                    Err(err) if self.state == SyncState::Pending => return Err(err),
                    Err(err) => {
                        tracing::warn!(%from, %err, "ignoring unresolvable late request");
                        return Ok(());
                    }
                };
                match self.conns.bind(from, src_id, target) {
                    Some(dst_id) => {
                        tracing::debug!(%from, %src_id, %dst_id, inst, var, "bound connection");
                        self.send(transport, from, Packet::DstId { src_id, dst_id })?;
                    }
                    None => {
                        tracing::warn!(%from, %src_id, "dropping new connection request; maps are frozen");
                    }
                }
            }
            Packet::ReqDone => self.nodes[idx].flags.req_done = true,
            Packet::DstId { src_id, dst_id } => {
                let frozen = self.conns.is_frozen();
                match self.conns.src_mut(src_id) {
                    Some(conn) if conn.node == from => {
                        if !frozen {
                            conn.dst_id = Some(dst_id);
                        }
                    }
                    _ => tracing::warn!(%from, %src_id, "DstId for an unknown connection"),
                }
            }
            Packet::Done => self.nodes[idx].flags.done = true,
            Packet::Err(code) => {
                self.fail(
                    transport,
                    NetError::ProtocolError { node: from, code },
                    false,
                );
            }
            Packet::Evt { dst_id, .. } => {
                tracing::debug!(%from, %dst_id, "dropping event received before sync finished");
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, transport: &mut dyn Transport) {
        if self.state != SyncState::Pending {
            return;
        }
        let resolved = self.conns.all_resolved()
            && self.nodes.iter().all(|n| n.flags.is_local || n.flags.req_done);
        if !resolved {
            return;
        }
        if !self.done_sent {
            self.done_sent = true;
            if let Err(err) = self.broadcast(transport, Packet::Done) {
                self.fail(transport, err, true);
                return;
            }
        }
        if self.nodes.iter().all(|n| n.flags.is_local || n.flags.done) {
            self.conns.freeze();
            self.state = SyncState::Success;
            tracing::info!(
                local = %self.local,
                src = self.conns.src_conns().len(),
                dst = self.conns.dst_conns().len(),
                "sync succeeded"
            );
        }
    }

    fn retry(&mut self, transport: &mut dyn Transport) -> Result<()> {
        for i in 0..self.nodes.len() {
            let NetNode { id, flags, .. } = self.nodes[i];
            if flags.is_local {
                continue;
            }
            if !flags.req_done || (self.done_sent && !flags.done) {
                tracing::debug!(node = %id, "resending Hello");
                self.send(transport, id, Packet::Hello { echo: true })?;
            }
            if flags.hello && self.conns.unresolved_for(id).next().is_some() {
                tracing::debug!(node = %id, "resending connection requests");
                self.send_requests(transport, id)?;
            }
        }
        Ok(())
    }

    fn send_requests(&mut self, transport: &mut dyn Transport, to: NodeId) -> Result<()> {
        for conn in self.conns.unresolved_for(to) {
            let packet = Packet::ConnRequest {
                src_id: conn.src_id,
                inst: &conn.dst_inst,
                var: &conn.dst_var,
            };
            packet.encode(&mut self.scratch);
            transport.send(to, &self.scratch)?;
        }
        self.send(transport, to, Packet::ReqDone)
    }

    fn send(&mut self, transport: &mut dyn Transport, to: NodeId, packet: Packet<'_>) -> Result<()> {
        packet.encode(&mut self.scratch);
        transport.send(to, &self.scratch)
    }

    fn broadcast(&mut self, transport: &mut dyn Transport, packet: Packet<'_>) -> Result<()> {
        packet.encode(&mut self.scratch);
        for node in &self.nodes {
            if !node.flags.is_local {
                transport.send(node.id, &self.scratch)?;
            }
        }
        Ok(())
    }

    fn fail(&mut self, transport: &mut dyn Transport, err: NetError, notify: bool) {
        if self.state == SyncState::Fail {
            return;
        }
        tracing::error!(local = %self.local, %err, "sync failed");
        if notify {
            let code = err.code();
            if let Err(send_err) = self.broadcast(transport, Packet::Err(code)) {
                tracing::warn!(%send_err, "could not broadcast Err");
            }
        }
        self.state = SyncState::Fail;
        self.failure = Some(err);
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("local", &self.local)
            .field("state", &self.state)
            .field("nodes", &self.nodes)
            .field("done_sent", &self.done_sent)
            .finish_non_exhaustive()
    }
}
