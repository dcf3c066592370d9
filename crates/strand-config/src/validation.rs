//! Program and roster validation.
//!
//! Validation collects every problem instead of stopping at the first. Program
//! checks run a dry Load into a scratch graph built from the same registry, so
//! anything [`ProgramConfig::apply`] would reject locally is reported here:
//! unknown classes, factory argument errors, duplicate labels, unresolved
//! endpoints and connections of the wrong type or direction.

use std::collections::HashSet;
use std::sync::Arc;

use strand_core::{ClassRegistry, Graph, GraphConfig};
use strand_net::wire::is_valid_label;
use thiserror::Error;

use crate::network::NetworkConfig;
use crate::program::ProgramConfig;

/// One problem found by validation.
#[derive(Debug, Error)]
pub enum Issue {
    /// `sample_rate` is zero.
    #[error("sample rate must be positive")]
    ZeroSampleRate,

    /// `frames_per_cycle` is zero.
    #[error("frames per cycle must be positive")]
    ZeroFrames,

    /// No class with this label is registered.
    #[error("instance '{instance}': unknown class '{class}'")]
    UnknownClass {
        /// Instance label or class.
        instance: String,
        /// Requested class.
        class: String,
    },

    /// Two instances share a label.
    #[error("instance label '{0}' is used more than once")]
    DuplicateLabel(String),

    /// A constructor argument cannot be converted.
    #[error("instance '{instance}': argument '{arg}': {reason}")]
    InvalidArg {
        /// Instance label or class.
        instance: String,
        /// Argument name.
        arg: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The graph refused part of the program.
    #[error("{context}: {source}")]
    Graph {
        /// Which declaration failed.
        context: String,
        /// Graph error.
        #[source]
        source: strand_core::Error,
    },

    /// A remote connection names a node missing from the roster.
    #[error("remote {remote}: node '{node}' is not in the roster")]
    UnknownNode {
        /// The remote connection.
        remote: String,
        /// Node label.
        node: String,
    },

    /// A remote connection targets this machine.
    #[error("remote {0}: destination is the local node; use a callback instead")]
    LocalTarget(String),

    /// A remote destination label cannot be carried on the wire.
    #[error("remote {0}: labels may not contain NUL")]
    InvalidRemoteLabel(String),

    /// Remote connections are declared but no roster was given.
    #[error("remote {0}: no network configuration")]
    RemoteWithoutNetwork(String),

    /// The roster is empty.
    #[error("network roster has no nodes")]
    EmptyRoster,

    /// The roster does not fit in a node id.
    #[error("network roster has {0} nodes; at most 65536 are supported")]
    TooManyNodes(usize),

    /// Two roster entries share a label.
    #[error("node label '{0}' is used more than once")]
    DuplicateNode(String),

    /// Two roster entries share an address.
    #[error("address {0} is used by more than one node")]
    DuplicateAddress(std::net::SocketAddr),

    /// `local` is not in the roster.
    #[error("local node '{0}' is not in the roster")]
    UnknownLocalNode(String),

    /// A sync interval is zero.
    #[error("sync {0} must be positive")]
    ZeroInterval(&'static str),
}

pub(crate) fn validate_program(program: &ProgramConfig, registry: &Arc<ClassRegistry>) -> Vec<Issue> {
    let mut issues = Vec::new();
    if program.sample_rate == 0 {
        issues.push(Issue::ZeroSampleRate);
    }
    if program.frames_per_cycle == 0 {
        issues.push(Issue::ZeroFrames);
    }
    let config = if issues.is_empty() {
        program.graph_config()
    } else {
        GraphConfig::default()
    };

    let mut graph = Graph::new(Arc::clone(registry), config);
    for instance in &program.instances {
        let name = instance.name();
        let args = match instance.try_args() {
            Ok(args) => args,
            Err((arg, reason)) => {
                issues.push(Issue::InvalidArg {
                    instance: name.to_owned(),
                    arg,
                    reason,
                });
                continue;
            }
        };
        match graph.allocate_instance(&instance.class, instance.label.as_deref(), &args) {
            Ok(_) => {}
            Err(strand_core::Error::ClassNotFound(class)) => issues.push(Issue::UnknownClass {
                instance: name.to_owned(),
                class,
            }),
            Err(strand_core::Error::DuplicateInstanceLabel(label)) => {
                issues.push(Issue::DuplicateLabel(label));
            }
            Err(source) => issues.push(Issue::Graph {
                context: format!("instance '{name}'"),
                source,
            }),
        }
    }

    for link in &program.audio {
        if let Err(source) = link.connect_audio(&mut graph) {
            issues.push(Issue::Graph {
                context: format!("audio {link}"),
                source,
            });
        }
    }
    for link in &program.callbacks {
        if let Err(source) = link.install_callback(&mut graph) {
            issues.push(Issue::Graph {
                context: format!("callback {link}"),
                source,
            });
        }
    }
    for remote in &program.remote {
        let marked = remote
            .src
            .resolve(&graph)
            .and_then(|(inst, var)| graph.mark_remote(inst, var));
        if let Err(source) = marked {
            issues.push(Issue::Graph {
                context: format!("remote {remote}"),
                source,
            });
        }
        if !is_valid_label(&remote.node)
            || !is_valid_label(&remote.dst.instance)
            || !is_valid_label(&remote.dst.var)
        {
            issues.push(Issue::InvalidRemoteLabel(remote.to_string()));
        }
    }
    graph.unload();
    issues
}

pub(crate) fn validate_remotes(program: &ProgramConfig, network: &NetworkConfig) -> Vec<Issue> {
    program
        .remote
        .iter()
        .filter_map(|remote| {
            if remote.node == network.local {
                Some(Issue::LocalTarget(remote.to_string()))
            } else if network.node_id(&remote.node).is_none() {
                Some(Issue::UnknownNode {
                    remote: remote.to_string(),
                    node: remote.node.clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

pub(crate) fn validate_network(network: &NetworkConfig) -> Vec<Issue> {
    let mut issues = Vec::new();
    if network.nodes.is_empty() {
        issues.push(Issue::EmptyRoster);
    }
    if network.nodes.len() > usize::from(u16::MAX) + 1 {
        issues.push(Issue::TooManyNodes(network.nodes.len()));
    }

    let mut labels = HashSet::new();
    let mut addrs = HashSet::new();
    for node in &network.nodes {
        if !labels.insert(node.label.as_str()) {
            issues.push(Issue::DuplicateNode(node.label.clone()));
        }
        // Port 0 binds an ephemeral port, so it never collides.
        if node.addr.port() != 0 && !addrs.insert(node.addr) {
            issues.push(Issue::DuplicateAddress(node.addr));
        }
    }
    if !network.nodes.is_empty() && !labels.contains(network.local.as_str()) {
        issues.push(Issue::UnknownLocalNode(network.local.clone()));
    }

    let sync = &network.sync;
    for (name, value) in [
        ("poll interval", sync.poll_interval_ms),
        ("retry interval", sync.retry_interval_ms),
        ("timeout", sync.timeout_ms),
    ] {
        if value == 0 {
            issues.push(Issue::ZeroInterval(name));
        }
    }
    issues
}
