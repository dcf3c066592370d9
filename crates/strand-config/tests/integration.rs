//! Integration tests for strand-config.
//!
//! Programs go from TOML to a running session, over loopback and UDP.

use std::time::Duration;

use strand_config::{ConfigError, Issue, NetworkConfig, ProgramConfig, SyncConfig};
use strand_core::{Graph, Value};
use strand_net::{LoopbackHub, Session, SyncState};
use strand_units::builtin_registry;
use tempfile::TempDir;

const SENDER: &str = r#"
name = "sender"

[[instances]]
class = "counter"
label = "clock"
[instances.args]
period = 1

[[remote]]
src = "clock.count"
node = "right"
dst = "p.in"
"#;

const RECEIVER: &str = r#"
name = "receiver"

[[instances]]
class = "probe"
label = "p"
"#;

fn value(session: &Session, inst: &str, var: &str) -> Value {
    let (i, v) = session.graph().resolve(inst, var).unwrap();
    session.graph().value(i, v).cloned().unwrap()
}

fn fast_sync() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 1,
        retry_interval_ms: 50,
        timeout_ms: 5000,
    }
}

#[test]
fn program_file_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("sender.toml");

    let program = ProgramConfig::from_toml(SENDER).unwrap();
    program.save(&path).unwrap();
    assert_eq!(ProgramConfig::load(&path).unwrap(), program);
}

#[test]
fn missing_file_reports_its_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");
    match ProgramConfig::load(&path) {
        Err(ConfigError::ReadFile { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected ReadFile, got {other:?}"),
    }
}

#[test]
fn network_file_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("network.toml");
    let mut net = NetworkConfig::new("left")
        .with_node("left", "127.0.0.1:7400".parse().unwrap())
        .with_node("right", "127.0.0.1:7401".parse().unwrap());
    net.sync = fast_sync();
    net.save(&path).unwrap();
    assert_eq!(NetworkConfig::load(&path).unwrap(), net);
}

#[test]
fn local_program_runs_without_network() {
    let program = ProgramConfig::from_toml(
        r#"
name = "count"

[[instances]]
class = "counter"
label = "clock"

[[instances]]
class = "probe"

[[callbacks]]
src = "clock.count"
dst = "probe0.in"
"#,
    )
    .unwrap();
    let mut session = program.instantiate(builtin_registry(), None).unwrap();
    assert!(session.graph().is_loaded());
    assert_eq!(session.sync().unwrap(), SyncState::Success);
    for _ in 0..3 {
        session.execute_cycle().unwrap();
    }
    assert_eq!(value(&session, "probe0", "count"), Value::UInt(3));
}

#[test]
fn remote_connections_need_a_network() {
    let program = ProgramConfig::from_toml(SENDER).unwrap();
    match program.instantiate(builtin_registry(), None) {
        Err(ConfigError::Validation(issues)) => {
            assert_eq!(issues.len(), 1);
            assert!(matches!(issues[0], Issue::RemoteWithoutNetwork(_)));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn applied_programs_sync_over_loopback() {
    let labels = vec!["left".to_string(), "right".to_string()];
    let programs = [
        ProgramConfig::from_toml(SENDER).unwrap(),
        ProgramConfig::from_toml(RECEIVER).unwrap(),
    ];
    let mut sessions: Vec<Session> = LoopbackHub::connect(2)
        .into_iter()
        .zip(&programs)
        .map(|(transport, program)| {
            let graph = Graph::new(builtin_registry(), program.graph_config());
            let mut session = Session::with_network(
                graph,
                Box::new(transport),
                labels.clone(),
                fast_sync().policy(),
            )
            .unwrap();
            program.apply(&mut session).unwrap();
            session
        })
        .collect();

    for session in &mut sessions {
        session.sync().unwrap();
    }
    for session in &mut sessions {
        assert_eq!(
            session.wait_sync(Duration::from_secs(10)).unwrap(),
            SyncState::Success
        );
    }
    for _ in 0..3 {
        sessions[0].execute_cycle().unwrap();
        sessions[1].execute_cycle().unwrap();
    }
    assert_eq!(value(&sessions[1], "p", "count"), Value::UInt(3));
    assert_eq!(value(&sessions[1], "p", "last"), Value::Double(3.0));
}

#[test]
fn apply_stops_at_the_first_error() {
    let program = ProgramConfig::from_toml(
        r#"
name = "broken"

[[instances]]
class = "probe"
label = "p"

[[instances]]
class = "nope"
"#,
    )
    .unwrap();
    let mut session = Session::new(Graph::new(builtin_registry(), program.graph_config()));
    assert!(matches!(
        program.apply(&mut session),
        Err(ConfigError::Graph(strand_core::Error::ClassNotFound(_)))
    ));
    assert_eq!(session.graph().len(), 1);
    assert!(!session.graph().is_loaded());
}

#[test]
fn instantiated_programs_sync_over_udp() {
    let probes: Vec<_> = (0..2)
        .map(|_| std::net::UdpSocket::bind("127.0.0.1:0").unwrap())
        .collect();
    let addrs: Vec<_> = probes.iter().map(|p| p.local_addr().unwrap()).collect();
    drop(probes);

    let roster = |local: &str| {
        let mut net = NetworkConfig::new(local)
            .with_node("left", addrs[0])
            .with_node("right", addrs[1]);
        net.sync = fast_sync();
        net
    };
    let left = ProgramConfig::from_toml(SENDER)
        .unwrap()
        .instantiate(builtin_registry(), Some(&roster("left")))
        .unwrap();
    let right = ProgramConfig::from_toml(RECEIVER)
        .unwrap()
        .instantiate(builtin_registry(), Some(&roster("right")))
        .unwrap();
    let mut sessions = [left, right];

    for session in &mut sessions {
        session.sync().unwrap();
    }
    for session in &mut sessions {
        assert_eq!(
            session.wait_sync(Duration::from_secs(10)).unwrap(),
            SyncState::Success
        );
    }
    let conns = sessions[0].engine().unwrap().conns();
    assert!(conns.all_resolved());
}
