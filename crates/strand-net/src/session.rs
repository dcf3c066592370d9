//! A graph plus its network link.
//!
//! [`Session`] is the runtime object a host drives: it owns the [`Graph`],
//! the sync state machine and the transport, and forwards remote writes once
//! the handshake has succeeded.
//!
//! ## Lifecycle
//!
//! 1. Build the graph through [`Session::graph_mut`] and declare remote
//!    connections with [`Session::declare_remote`]
//! 2. [`Session::finish_load`]
//! 3. [`Session::sync`], then [`Session::poll_sync`] or [`Session::wait_sync`]
//!    until Success
//! 4. [`Session::execute_cycle`] once per block
//! 5. [`Session::unload`] to return to Pre

use std::time::{Duration, Instant};

use strand_core::{CycleReport, EventFlags, Graph, InstanceId, Message, Value, VarId};

use crate::conn::{Directory, SrcId};
use crate::error::{NetError, Result};
use crate::sync::{SyncEngine, SyncPolicy, SyncState};
use crate::transport::{Datagram, NodeId, Transport};
use crate::wire::{self, Packet};
use crate::worker::{NetLink, SyncWorker};

struct Network {
    worker: SyncWorker,
    link: Option<Box<NetLink>>,
}

/// Graph runtime with optional multi-node networking.
pub struct Session {
    graph: Graph,
    net: Option<Network>,
    state: SyncState,
    failure: Option<NetError>,
    scratch: Vec<u8>,
    inbound: Vec<Datagram>,
}

impl Session {
    /// Creates a single-node session.
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            net: None,
            state: SyncState::Pre,
            failure: None,
            scratch: Vec::new(),
            inbound: Vec::new(),
        }
    }

    /// Creates a networked session.
    ///
    /// `nodes` lists every node label in roster order; the transport's local
    /// id selects this node's entry.
    pub fn with_network(
        graph: Graph,
        transport: Box<dyn Transport>,
        nodes: Vec<String>,
        policy: SyncPolicy,
    ) -> Result<Self> {
        let engine = SyncEngine::new(transport.local(), nodes, policy)?;
        let worker = SyncWorker::spawn()?;
        Ok(Self {
            graph,
            net: Some(Network {
                worker,
                link: Some(Box::new(NetLink { engine, transport })),
            }),
            state: SyncState::Pre,
            failure: None,
            scratch: Vec::with_capacity(64),
            inbound: Vec::with_capacity(64),
        })
    }

    /// The graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The graph, for building it during Load.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Current handshake state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Returns `true` when the session was created with a network.
    pub fn is_networked(&self) -> bool {
        self.net.is_some()
    }

    /// The sync engine, unless the worker currently holds it.
    pub fn engine(&self) -> Option<&SyncEngine> {
        self.net
            .as_ref()
            .and_then(|n| n.link.as_ref())
            .map(|l| &l.engine)
    }

    /// This node's id, unless the worker currently holds the link.
    pub fn local_node(&self) -> Option<NodeId> {
        self.engine().map(SyncEngine::local)
    }

    /// Declares that `src_inst.src_var` feeds `inst_label.var_label` on the
    /// node labelled `node_label`.
    ///
    /// The source must be a control output. Must be called before
    /// [`finish_load`](Self::finish_load).
    pub fn declare_remote(
        &mut self,
        src_inst: InstanceId,
        src_var: VarId,
        node_label: &str,
        inst_label: &str,
        var_label: &str,
    ) -> Result<SrcId> {
        let state = self.state;
        let Some(net) = self.net.as_mut() else {
            return Err(NetError::NetNodeNotFound(node_label.to_owned()));
        };
        let Some(link) = net.link.as_mut() else {
            return Err(NetError::InvalidState {
                op: "declare a remote connection",
                state,
            });
        };
        if link.engine.node_id(node_label).is_none() {
            return Err(NetError::NetNodeNotFound(node_label.to_owned()));
        }
        self.graph.mark_remote(src_inst, src_var)?;
        let src_id = link
            .engine
            .add_src(src_inst, src_var, node_label, inst_label, var_label)?;
        tracing::debug!(%src_id, node = node_label, inst = inst_label, var = var_label, "declared remote connection");
        Ok(src_id)
    }

    /// Seals the graph.
    pub fn finish_load(&mut self) -> Result<()> {
        self.graph.finish_load()?;
        Ok(())
    }

    /// Starts the handshake.
    ///
    /// A single-node session goes straight to Success. Otherwise the link is
    /// handed to the worker and the session stays Pending until
    /// [`poll_sync`](Self::poll_sync) or [`wait_sync`](Self::wait_sync) gets it
    /// back.
    pub fn sync(&mut self) -> Result<SyncState> {
        if self.state != SyncState::Pre {
            return Err(NetError::InvalidState {
                op: "sync",
                state: self.state,
            });
        }
        if !self.graph.is_loaded() {
            return Err(strand_core::Error::NotLoaded.into());
        }
        let Some(net) = self.net.as_mut() else {
            self.state = SyncState::Success;
            return Ok(self.state);
        };
        let Some(mut link) = net.link.take() else {
            return Err(NetError::ThreadControlFailed("sync link is missing"));
        };

        let directory = Directory::snapshot(&self.graph);
        let NetLink { engine, transport } = &mut *link;
        if let Err(err) = engine.begin(transport.as_mut(), directory, Instant::now()) {
            net.link = Some(link);
            return Err(err);
        }
        if engine.state() == SyncState::Pending {
            if let Err(err) = net.worker.run(link) {
                self.state = SyncState::Fail;
                return Err(err);
            }
            self.state = SyncState::Pending;
            Ok(self.state)
        } else {
            net.link = Some(link);
            self.settle()
        }
    }

    /// Checks on a pending handshake without blocking.
    ///
    /// Returns the failure cause once, when the handshake has just failed.
    pub fn poll_sync(&mut self) -> Result<SyncState> {
        if self.state != SyncState::Pending {
            return Ok(self.state);
        }
        let Some(net) = self.net.as_mut() else {
            return Ok(self.state);
        };
        if let Some(link) = net.worker.try_take()? {
            net.link = Some(link);
            return self.settle();
        }
        Ok(self.state)
    }

    /// Blocks up to `timeout` for a pending handshake to finish.
    pub fn wait_sync(&mut self, timeout: Duration) -> Result<SyncState> {
        if self.state != SyncState::Pending {
            return Ok(self.state);
        }
        let Some(net) = self.net.as_mut() else {
            return Ok(self.state);
        };
        if let Some(link) = net.worker.take_timeout(timeout)? {
            net.link = Some(link);
            return self.settle();
        }
        Ok(self.state)
    }

    /// Abandons a pending handshake and waits for the worker to pause.
    ///
    /// The session ends in Fail.
    pub fn cancel_sync(&mut self) -> Result<()> {
        if self.state != SyncState::Pending {
            return Ok(());
        }
        let Some(net) = self.net.as_mut() else {
            return Ok(());
        };
        net.worker.pause()?;
        let link = net
            .worker
            .take_timeout(Duration::from_secs(5))?
            .ok_or(NetError::ThreadControlFailed("sync thread did not pause"))?;
        net.link = Some(link);
        self.state = SyncState::Fail;
        self.failure = Some(NetError::Cancelled);
        Ok(())
    }

    /// Error that moved the session to Fail, if not yet returned.
    pub fn take_failure(&mut self) -> Option<NetError> {
        self.failure.take()
    }

    /// Runs one graph cycle, then services the network.
    ///
    /// Remote writes of this cycle are sent first. Inbound `Evt`s are
    /// delivered after the sweep, so they take effect in the next cycle. A
    /// peer failure seen while draining wins over the cycle's own failures,
    /// which are logged.
    pub fn execute_cycle(&mut self) -> Result<CycleReport> {
        if self.state != SyncState::Success {
            return Err(NetError::InvalidState {
                op: "execute a cycle",
                state: self.state,
            });
        }
        let report = self.graph.execute_cycle();
        self.flush_outbox();
        if let Err(err) = self.pump() {
            if let Err(cycle) = &report {
                tracing::warn!(%cycle, "cycle failures superseded by a session failure");
            }
            return Err(err);
        }
        Ok(report?)
    }

    /// Handles a host message.
    ///
    /// UI and MIDI messages go to the graph. Network datagrams go to the sync
    /// worker while Pending and to the runtime pump after Success.
    pub fn dispatch(&mut self, message: &Message<'_>) -> Result<bool> {
        let Message::Net { from, bytes } = *message else {
            let handled = self.graph.dispatch(message)?;
            if self.state != SyncState::Success {
                self.graph.clear_outbox();
            }
            return Ok(handled);
        };
        let from = NodeId(from);
        match self.state {
            SyncState::Pending => {
                let Some(net) = self.net.as_ref() else {
                    return Ok(false);
                };
                net.worker.inject(Datagram {
                    from,
                    bytes: bytes.to_vec(),
                })?;
                Ok(true)
            }
            SyncState::Success if self.net.is_some() => {
                self.receive(from, bytes);
                self.check_link()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Resets every instance.
    pub fn reset(&mut self) -> Result<()> {
        self.graph.reset()?;
        if self.state != SyncState::Success {
            self.graph.clear_outbox();
        }
        Ok(())
    }

    /// Saves or restores instance state.
    pub fn store(&mut self, save: bool) -> Result<()> {
        self.graph.store(save)?;
        Ok(())
    }

    /// Frees every instance and forgets all connections.
    pub fn unload(&mut self) -> Result<()> {
        if self.state == SyncState::Pending {
            self.cancel_sync()?;
        }
        self.graph.unload();
        if let Some(link) = self.net.as_mut().and_then(|n| n.link.as_mut()) {
            link.engine.reset();
        }
        self.state = SyncState::Pre;
        self.failure = None;
        Ok(())
    }

    fn settle(&mut self) -> Result<SyncState> {
        let Some(link) = self.net.as_mut().and_then(|n| n.link.as_mut()) else {
            return Ok(self.state);
        };
        self.state = link.engine.state();
        if self.state == SyncState::Fail {
            let err = link.engine.take_failure().unwrap_or(NetError::Cancelled);
            return Err(err);
        }
        Ok(self.state)
    }

    fn check_link(&mut self) -> Result<()> {
        if let Some(link) = self.net.as_mut().and_then(|n| n.link.as_mut())
            && link.engine.state() == SyncState::Fail
        {
            self.state = SyncState::Fail;
            self.graph.clear_outbox();
            return Err(link.engine.take_failure().unwrap_or(NetError::Cancelled));
        }
        Ok(())
    }

    fn pump(&mut self) -> Result<()> {
        let Some(link) = self.net.as_mut().and_then(|n| n.link.as_mut()) else {
            return Ok(());
        };
        let mut inbound = std::mem::take(&mut self.inbound);
        let drained = link.transport.drain_pending(&mut inbound);
        for d in inbound.drain(..) {
            self.receive(d.from, &d.bytes);
        }
        self.inbound = inbound;
        if let Err(err) = drained {
            tracing::warn!(%err, "receiving datagrams failed");
        }
        self.check_link()
    }

    fn receive(&mut self, from: NodeId, bytes: &[u8]) {
        let Some(link) = self.net.as_mut().and_then(|n| n.link.as_mut()) else {
            return;
        };
        let Ok(Packet::Evt { dst_id, blob }) = Packet::decode(bytes) else {
            let NetLink { engine, transport } = &mut **link;
            engine.handle(transport.as_mut(), from, bytes);
            return;
        };
        let Some(conn) = link.engine.conns().dst(dst_id).copied() else {
            tracing::warn!(%from, %dst_id, "event for an unknown connection");
            return;
        };
        if conn.node != from {
            tracing::warn!(%from, %dst_id, "event from a node that does not own the connection");
            return;
        }
        let value = match Value::decode(blob) {
            Ok((value, _)) => value,
            Err(err) => {
                tracing::warn!(%from, %dst_id, %err, "dropping event with a bad value");
                return;
            }
        };
        if let Err(err) = self
            .graph
            .deliver(conn.inst, conn.var, &value, EventFlags::NETWORK)
        {
            tracing::warn!(%from, %dst_id, %err, "network event delivery failed");
        }
    }

    fn flush_outbox(&mut self) {
        let Some(link) = self.net.as_mut().and_then(|n| n.link.as_mut()) else {
            self.graph.clear_outbox();
            return;
        };
        let NetLink { engine, transport } = &mut **link;
        let scratch = &mut self.scratch;
        self.graph.drain_outbox(|inst, var, value| {
            for (node, dst_id) in engine.conns().targets(inst, var) {
                wire::encode_evt(scratch, dst_id, value);
                if let Err(err) = transport.send(node, &scratch[..]) {
                    tracing::trace!(%node, %dst_id, %err, "event send failed");
                }
            }
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SyncState::Pending
            && let Err(err) = self.cancel_sync()
        {
            tracing::warn!(%err, "could not pause sync on drop");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("instances", &self.graph.len())
            .field("networked", &self.net.is_some())
            .finish_non_exhaustive()
    }
}
