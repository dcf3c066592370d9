//! Multi-node session tests.
//!
//! Sessions run over the in-process loopback hub unless noted. Each test uses
//! a short retry interval so lost-datagram recovery stays fast.

use std::time::{Duration, Instant};

use strand_core::{Args, Graph, GraphConfig, InstanceId, Message, Value};
use strand_net::{
    Directory, DstId, ErrorCode, LoopbackHub, NetError, NodeId, Packet, Session, SrcId,
    SyncEngine, SyncPolicy, SyncState, Transport, UdpTransport,
};
use strand_units::builtin_registry;

fn policy() -> SyncPolicy {
    SyncPolicy {
        poll_interval: Duration::from_millis(1),
        retry_interval: Duration::from_millis(50),
        timeout: Duration::from_secs(5),
    }
}

fn graph() -> Graph {
    Graph::new(builtin_registry(), GraphConfig::default())
}

fn labels(n: u16) -> Vec<String> {
    (0..n).map(|i| format!("n{i}")).collect()
}

fn loopback_sessions(n: u16) -> Vec<Session> {
    LoopbackHub::connect(n)
        .into_iter()
        .map(|t| Session::with_network(graph(), Box::new(t), labels(n), policy()).unwrap())
        .collect()
}

fn alloc(s: &mut Session, class: &str, label: &str) -> InstanceId {
    s.graph_mut()
        .allocate_instance(class, Some(label), &Args::new())
        .unwrap()
}

fn remote(s: &mut Session, src: &str, node: &str, dst: &str) -> SrcId {
    let (src_inst, src_var) = src.split_once('.').unwrap();
    let (dst_inst, dst_var) = dst.split_once('.').unwrap();
    let (inst, var) = s.graph().resolve(src_inst, src_var).unwrap();
    s.declare_remote(inst, var, node, dst_inst, dst_var).unwrap()
}

fn start(sessions: &mut [Session]) {
    for s in sessions.iter_mut() {
        s.finish_load().unwrap();
        s.sync().unwrap();
    }
}

fn wait(sessions: &mut [Session]) -> Vec<Result<SyncState, NetError>> {
    sessions
        .iter_mut()
        .map(|s| s.wait_sync(Duration::from_secs(10)))
        .collect()
}

fn value(s: &Session, path: &str) -> Value {
    let (inst, var) = path.split_once('.').unwrap();
    let (i, v) = s.graph().resolve(inst, var).unwrap();
    s.graph().value(i, v).cloned().unwrap()
}

fn set(s: &mut Session, path: &str, value: Value) {
    let (inst, var) = path.split_once('.').unwrap();
    let (inst, var) = s.graph().resolve(inst, var).unwrap();
    let mut blob = Vec::new();
    value.encode_into(&mut blob);
    s.dispatch(&Message::Ui {
        inst,
        var,
        value: &blob,
    })
    .unwrap();
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn single_remote_connection_resolves() {
    let mut s = loopback_sessions(2);
    alloc(&mut s[0], "number", "knob");
    remote(&mut s[0], "knob.out", "n1", "Osc1.in");
    alloc(&mut s[1], "probe", "Osc1");
    start(&mut s);
    for r in wait(&mut s) {
        assert_eq!(r.unwrap(), SyncState::Success);
    }

    let src = &s[0].engine().unwrap().conns().src_conns()[0];
    let dst_id = src.dst_id.expect("dst id resolved");
    let dst = *s[1].engine().unwrap().conns().dst(dst_id).unwrap();
    assert_eq!(dst.inst, s[1].graph().instance_id("Osc1").unwrap());
    assert_eq!(dst.node, NodeId(0));
    assert_eq!(dst.src_id, src.src_id);
}

#[test]
fn every_connection_resolves_in_a_ring() {
    let mut s = loopback_sessions(3);
    for (i, session) in s.iter_mut().enumerate() {
        alloc(session, "number", "knob");
        alloc(session, "probe", "p");
        let next = format!("n{}", (i + 1) % 3);
        let prev = format!("n{}", (i + 2) % 3);
        remote(session, "knob.out", &next, "p.in");
        remote(session, "knob.out", &prev, "p.in");
    }
    start(&mut s);
    for r in wait(&mut s) {
        assert_eq!(r.unwrap(), SyncState::Success);
    }
    for session in &s {
        let conns = session.engine().unwrap().conns();
        assert!(conns.src_conns().iter().all(|c| c.dst_id.is_some()));
        assert_eq!(conns.dst_conns().len(), 2);
        assert!(session.engine().unwrap().nodes().iter().all(|n| n.flags.done || n.flags.is_local));
    }
}

#[test]
fn unknown_target_instance_fails_every_node() {
    let mut s = loopback_sessions(2);
    alloc(&mut s[0], "number", "knob");
    remote(&mut s[0], "knob.out", "n1", "Nope.in");
    alloc(&mut s[1], "probe", "Osc1");
    start(&mut s);
    let results = wait(&mut s);

    assert!(matches!(
        &results[0],
        Err(NetError::ProtocolError {
            node: NodeId(1),
            code: ErrorCode::InstanceNotFound
        })
    ));
    assert!(matches!(
        &results[1],
        Err(NetError::Graph(strand_core::Error::InstanceNotFound(label))) if label == "Nope"
    ));
    for session in &mut s {
        assert_eq!(session.state(), SyncState::Fail);
        assert!(matches!(
            session.execute_cycle(),
            Err(NetError::InvalidState { .. })
        ));
    }
}

#[test]
fn repeated_conn_requests_bind_once() {
    let mut g = graph();
    g.allocate_instance("probe", Some("Osc1"), &Args::new()).unwrap();
    g.finish_load().unwrap();

    let mut t = LoopbackHub::connect(2);
    let mut requester = t.remove(0);
    let mut target = t.remove(0);
    let mut engine = SyncEngine::new(NodeId(1), labels(2), policy()).unwrap();
    let now = Instant::now();
    engine
        .begin(&mut target, Directory::snapshot(&g), now)
        .unwrap();

    let mut bytes = Vec::new();
    Packet::ConnRequest {
        src_id: SrcId(4),
        inst: "Osc1",
        var: "in",
    }
    .encode(&mut bytes);
    for _ in 0..3 {
        requester.send(NodeId(1), &bytes).unwrap();
    }
    engine.poll(&mut target, now);
    assert_eq!(engine.conns().dst_conns().len(), 1);

    let mut replies = Vec::new();
    requester.drain_pending(&mut replies).unwrap();
    let ids: Vec<DstId> = replies
        .iter()
        .filter_map(|d| match Packet::decode(&d.bytes) {
            Ok(Packet::DstId { src_id, dst_id }) if src_id == SrcId(4) => Some(dst_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|&id| id == ids[0]));
}

#[test]
fn cancel_leaves_the_session_failed_until_unload() {
    let mut s = loopback_sessions(2);
    alloc(&mut s[0], "number", "knob");
    remote(&mut s[0], "knob.out", "n1", "p.in");
    s[0].finish_load().unwrap();
    // n1 never syncs, so n0 stays Pending.
    assert_eq!(s[0].sync().unwrap(), SyncState::Pending);
    assert_eq!(s[0].poll_sync().unwrap(), SyncState::Pending);

    s[0].cancel_sync().unwrap();
    assert_eq!(s[0].state(), SyncState::Fail);
    assert!(matches!(s[0].take_failure(), Some(NetError::Cancelled)));

    s[0].unload().unwrap();
    assert_eq!(s[0].state(), SyncState::Pre);
    assert!(s[0].graph().is_empty());
    assert!(s[0].engine().unwrap().conns().src_conns().is_empty());
}

#[test]
fn declare_remote_checks_node_and_source() {
    let mut s = loopback_sessions(2);
    let knob = alloc(&mut s[0], "number", "knob");
    let (_, input) = s[0].graph().resolve("knob", "in").unwrap();
    let (_, out) = s[0].graph().resolve("knob", "out").unwrap();

    assert!(matches!(
        s[0].declare_remote(knob, out, "n7", "p", "in"),
        Err(NetError::NetNodeNotFound(_))
    ));
    assert!(matches!(
        s[0].declare_remote(knob, input, "n1", "p", "in"),
        Err(NetError::Graph(strand_core::Error::VariableTypeError { .. }))
    ));
    assert!(s[0].engine().unwrap().conns().src_conns().is_empty());
}

// ============================================================================
// Runtime
// ============================================================================

#[test]
#[allow(clippy::approx_constant)]
fn event_reaches_its_destination_once() {
    let mut s = loopback_sessions(2);
    for i in 0..6 {
        alloc(&mut s[0], "number", &format!("knob{i}"));
        alloc(&mut s[1], "probe", &format!("p{i}"));
    }
    for i in 0..6 {
        remote(&mut s[0], &format!("knob{i}.out"), "n1", &format!("p{i}.in"));
    }
    start(&mut s);
    for r in wait(&mut s) {
        assert_eq!(r.unwrap(), SyncState::Success);
    }
    let dst_id = s[0].engine().unwrap().conns().src_conns()[5].dst_id.unwrap();
    let dst = *s[1].engine().unwrap().conns().dst(dst_id).unwrap();
    assert_eq!(dst.inst, s[1].graph().instance_id("p5").unwrap());

    set(&mut s[0], "knob5.in", Value::Double(3.14));
    s[0].execute_cycle().unwrap();
    s[1].execute_cycle().unwrap();

    assert_eq!(value(&s[1], "p5.count"), Value::UInt(1));
    assert_eq!(value(&s[1], "p5.last"), Value::Double(3.14));
    for i in 0..5 {
        assert_eq!(value(&s[1], &format!("p{i}.count")), Value::UInt(0));
    }
}

#[test]
fn values_written_during_a_cycle_are_forwarded() {
    let mut s = loopback_sessions(2);
    let mut args = Args::new();
    args.insert("period", 1_u32);
    s[0].graph_mut()
        .allocate_instance("counter", Some("clock"), &args)
        .unwrap();
    remote(&mut s[0], "clock.count", "n1", "p.in");
    alloc(&mut s[1], "probe", "p");
    start(&mut s);
    for r in wait(&mut s) {
        assert_eq!(r.unwrap(), SyncState::Success);
    }

    for _ in 0..4 {
        s[0].execute_cycle().unwrap();
        s[1].execute_cycle().unwrap();
    }
    assert_eq!(value(&s[1], "p.count"), Value::UInt(4));
    assert_eq!(value(&s[1], "p.last"), Value::Double(4.0));
}

#[test]
fn cycle_writes_are_sent_before_a_peer_failure_is_reported() {
    let mut hub = LoopbackHub::connect(2);
    let mut peer_transport = hub.pop().unwrap();
    let mut s = Session::with_network(graph(), Box::new(hub.pop().unwrap()), labels(2), policy())
        .unwrap();
    alloc(&mut s, "number", "knob");
    remote(&mut s, "knob.out", "n1", "p.in");
    s.finish_load().unwrap();

    let mut peer_graph = graph();
    peer_graph
        .allocate_instance("probe", Some("p"), &Args::new())
        .unwrap();
    peer_graph.finish_load().unwrap();
    let mut peer = SyncEngine::new(NodeId(1), labels(2), policy()).unwrap();
    peer.begin(
        &mut peer_transport,
        Directory::snapshot(&peer_graph),
        Instant::now(),
    )
    .unwrap();

    let mut state = s.sync().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while (state != SyncState::Success || peer.state() != SyncState::Success)
        && Instant::now() < deadline
    {
        peer.poll(&mut peer_transport, Instant::now());
        state = s.poll_sync().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(state, SyncState::Success);
    assert_eq!(peer.state(), SyncState::Success);

    set(&mut s, "knob.in", Value::Double(0.5));
    let mut err = Vec::new();
    Packet::Err(ErrorCode::InstanceNotFound).encode(&mut err);
    peer_transport.send(NodeId(0), &err).unwrap();

    assert!(matches!(
        s.execute_cycle(),
        Err(NetError::ProtocolError {
            node: NodeId(1),
            code: ErrorCode::InstanceNotFound
        })
    ));
    assert_eq!(s.state(), SyncState::Fail);

    let mut inbox = Vec::new();
    peer_transport.drain_pending(&mut inbox).unwrap();
    let events: Vec<Value> = inbox
        .iter()
        .filter_map(|d| match Packet::decode(&d.bytes) {
            Ok(Packet::Evt { blob, .. }) => Value::decode(blob).ok().map(|(v, _)| v),
            _ => None,
        })
        .collect();
    assert_eq!(events, vec![Value::Double(0.5)]);
}

#[test]
fn single_node_session_runs_without_network() {
    let mut s = Session::new(graph());
    let knob = alloc(&mut s, "number", "knob");
    let (_, out) = s.graph().resolve("knob", "out").unwrap();
    assert!(matches!(
        s.declare_remote(knob, out, "n1", "p", "in"),
        Err(NetError::NetNodeNotFound(_))
    ));
    assert!(matches!(
        s.sync(),
        Err(NetError::Graph(strand_core::Error::NotLoaded))
    ));

    s.finish_load().unwrap();
    assert!(matches!(
        s.execute_cycle(),
        Err(NetError::InvalidState {
            state: SyncState::Pre,
            ..
        })
    ));
    assert_eq!(s.sync().unwrap(), SyncState::Success);
    let report = s.execute_cycle().unwrap();
    assert_eq!(report.cycle, 1);
    assert!(!s.dispatch(&Message::Unknown(7)).unwrap());
}

#[test]
fn udp_sessions_sync_and_forward() {
    let probes: Vec<_> = (0..2)
        .map(|_| std::net::UdpSocket::bind("127.0.0.1:0").unwrap())
        .collect();
    let roster: Vec<_> = probes.iter().map(|p| p.local_addr().unwrap()).collect();
    drop(probes);

    let mut s: Vec<Session> = (0..2)
        .map(|i| {
            let t = UdpTransport::bind(NodeId(i), roster.clone()).unwrap();
            Session::with_network(graph(), Box::new(t), labels(2), policy()).unwrap()
        })
        .collect();
    alloc(&mut s[0], "number", "knob");
    remote(&mut s[0], "knob.out", "n1", "p.in");
    alloc(&mut s[1], "probe", "p");
    start(&mut s);
    for r in wait(&mut s) {
        assert_eq!(r.unwrap(), SyncState::Success);
    }

    set(&mut s[0], "knob.in", Value::Double(0.25));
    s[0].execute_cycle().unwrap();
    for _ in 0..200 {
        s[1].execute_cycle().unwrap();
        if value(&s[1], "p.count") == Value::UInt(1) {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(value(&s[1], "p.last"), Value::Double(0.25));
}
