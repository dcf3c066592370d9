//! Program file format: instances, connections and remote connections.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strand_core::{Args, ClassRegistry, Graph, GraphConfig, InstanceId, Value, VarId};
use strand_net::Session;

use crate::error::{ConfigError, Result};
use crate::network::NetworkConfig;
use crate::validation::{self, Issue};

/// An `instance.variable` reference.
///
/// Serialized as a single string. The instance label is everything before
/// the first `.`; both halves must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    /// Instance label.
    pub instance: String,
    /// Variable label.
    pub var: String,
}

impl Endpoint {
    /// Builds an endpoint from its two labels.
    pub fn new(instance: impl Into<String>, var: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            var: var.into(),
        }
    }

    /// Looks the endpoint up in a graph.
    pub fn resolve(&self, graph: &Graph) -> strand_core::Result<(InstanceId, VarId)> {
        graph.resolve(&self.instance, &self.var)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((inst, var)) if !inst.is_empty() && !var.is_empty() => Ok(Self::new(inst, var)),
            _ => Err(ConfigError::InvalidEndpoint(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(e: Endpoint) -> Self {
        e.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.var)
    }
}

/// One instance to allocate.
///
/// ```toml
/// [[instances]]
/// class = "sine"
/// label = "osc"
/// [instances.args]
/// freq = 440.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceConfig {
    /// Class label.
    pub class: String,

    /// Instance label; generated from the class when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Constructor arguments.
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub args: toml::Table,
}

impl InstanceConfig {
    /// Create an unlabelled instance of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            label: None,
            args: toml::Table::new(),
        }
    }

    /// Set the instance label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a constructor argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Label if given, class otherwise. Used in messages.
    pub fn name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.class)
    }

    /// Converts the TOML arguments to runtime values.
    ///
    /// Integers become `Int` when they fit, `UInt` otherwise. Arrays, tables
    /// and datetimes are rejected.
    pub fn args(&self) -> Result<Args> {
        self.try_args()
            .map_err(|(arg, reason)| ConfigError::InvalidArg {
                instance: self.name().to_owned(),
                arg,
                reason,
            })
    }

    pub(crate) fn try_args(&self) -> std::result::Result<Args, (String, &'static str)> {
        let mut args = Args::new();
        for (name, value) in &self.args {
            let value = match value {
                toml::Value::Boolean(b) => Value::Bool(*b),
                toml::Value::Integer(i) => {
                    if let Ok(v) = i32::try_from(*i) {
                        Value::Int(v)
                    } else if let Ok(v) = u32::try_from(*i) {
                        Value::UInt(v)
                    } else {
                        return Err((name.clone(), "integer does not fit in 32 bits"));
                    }
                }
                toml::Value::Float(f) => Value::Double(*f),
                toml::Value::String(s) => Value::from(s.as_str()),
                toml::Value::Array(_) | toml::Value::Table(_) | toml::Value::Datetime(_) => {
                    return Err((name.clone(), "only booleans, numbers and strings are supported"));
                }
            };
            args.insert(name, value);
        }
        Ok(args)
    }
}

/// A local connection between two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkConfig {
    /// Source output.
    pub src: Endpoint,
    /// Destination input.
    pub dst: Endpoint,
}

impl LinkConfig {
    /// Create a link.
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        Self { src, dst }
    }

    /// Aliases the destination input onto the source's buffer.
    pub fn connect_audio(&self, graph: &mut Graph) -> strand_core::Result<()> {
        let (si, sv) = self.src.resolve(graph)?;
        let (di, dv) = self.dst.resolve(graph)?;
        graph.connect_audio(si, sv, di, dv)
    }

    /// Subscribes the destination to the source.
    pub fn install_callback(&self, graph: &mut Graph) -> strand_core::Result<()> {
        let (si, sv) = self.src.resolve(graph)?;
        let (di, dv) = self.dst.resolve(graph)?;
        graph.install_callback(si, sv, di, dv)
    }
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// A connection from a local output to a variable on another node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Local control output.
    pub src: Endpoint,
    /// Label of the destination node.
    pub node: String,
    /// Destination on that node.
    pub dst: Endpoint,
}

impl RemoteConfig {
    /// Create a remote connection.
    pub fn new(src: Endpoint, node: impl Into<String>, dst: Endpoint) -> Self {
        Self {
            src,
            node: node.into(),
            dst,
        }
    }
}

impl fmt::Display for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}:{}", self.src, self.node, self.dst)
    }
}

/// A program: what one node loads.
///
/// # TOML Format
///
/// ```toml
/// name = "tone"
/// sample_rate = 48000
/// frames_per_cycle = 256
///
/// [[instances]]
/// class = "sine"
/// label = "osc"
/// [instances.args]
/// freq = 440.0
///
/// [[instances]]
/// class = "meter"
///
/// [[audio]]
/// src = "osc.out"
/// dst = "meter0.in"
///
/// [[remote]]
/// src = "meter0.rms"
/// node = "display"
/// dst = "probe.in"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramConfig {
    /// Program name.
    pub name: String,

    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frames per cycle.
    #[serde(default = "default_frames_per_cycle")]
    pub frames_per_cycle: usize,

    /// Instances, allocated in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceConfig>,

    /// Audio buffer aliases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<LinkConfig>,

    /// Control callbacks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub callbacks: Vec<LinkConfig>,

    /// Cross-node connections.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote: Vec<RemoteConfig>,
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_frames_per_cycle() -> usize {
    256
}

impl ProgramConfig {
    /// Create an empty program.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            sample_rate: default_sample_rate(),
            frames_per_cycle: default_frames_per_cycle(),
            instances: Vec::new(),
            audio: Vec::new(),
            callbacks: Vec::new(),
            remote: Vec::new(),
        }
    }

    /// Add an instance.
    pub fn with_instance(mut self, instance: InstanceConfig) -> Self {
        self.instances.push(instance);
        self
    }

    /// Add an audio connection.
    pub fn with_audio(mut self, link: LinkConfig) -> Self {
        self.audio.push(link);
        self
    }

    /// Add a control callback.
    pub fn with_callback(mut self, link: LinkConfig) -> Self {
        self.callbacks.push(link);
        self
    }

    /// Add a remote connection.
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote.push(remote);
        self
    }

    /// Load a program from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load a program from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the program to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }

    /// Convert the program to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Engine parameters for the graph.
    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            sample_rate: self.sample_rate as f32,
            frames_per_cycle: self.frames_per_cycle,
        }
    }

    /// Checks the program against a class registry without touching a session.
    ///
    /// Every problem found is returned, not just the first.
    pub fn validate(&self, registry: &Arc<ClassRegistry>) -> Vec<Issue> {
        validation::validate_program(self, registry)
    }

    /// Checks the remote connections against a network roster.
    pub fn validate_remotes(&self, network: &NetworkConfig) -> Vec<Issue> {
        validation::validate_remotes(self, network)
    }

    /// Performs Load on `session`: allocates instances, then audio
    /// connections, callbacks and remote connections in declaration order,
    /// then seals the graph.
    ///
    /// Stops at the first error. Instances allocated before it stay in the
    /// graph until the session is unloaded.
    pub fn apply(&self, session: &mut Session) -> Result<Vec<InstanceId>> {
        let graph = session.graph_mut();
        let mut ids = Vec::with_capacity(self.instances.len());
        for instance in &self.instances {
            let args = instance.args()?;
            ids.push(graph.allocate_instance(&instance.class, instance.label.as_deref(), &args)?);
        }
        for link in &self.audio {
            link.connect_audio(graph)?;
        }
        for link in &self.callbacks {
            link.install_callback(graph)?;
        }
        for remote in &self.remote {
            let (inst, var) = remote.src.resolve(session.graph())?;
            session.declare_remote(inst, var, &remote.node, &remote.dst.instance, &remote.dst.var)?;
        }
        session.finish_load()?;
        tracing::info!(
            program = %self.name,
            instances = ids.len(),
            remote = self.remote.len(),
            "program loaded"
        );
        Ok(ids)
    }

    /// Validates, builds the session and applies the program to it.
    ///
    /// With a network the session binds the roster's UDP socket; without one
    /// the program must not declare remote connections.
    pub fn instantiate(
        &self,
        registry: Arc<ClassRegistry>,
        network: Option<&NetworkConfig>,
    ) -> Result<Session> {
        let mut issues = self.validate(&registry);
        match network {
            Some(net) => {
                issues.extend(net.validate());
                issues.extend(self.validate_remotes(net));
            }
            None => issues.extend(
                self.remote
                    .iter()
                    .map(|r| Issue::RemoteWithoutNetwork(r.to_string())),
            ),
        }
        if !issues.is_empty() {
            return Err(ConfigError::Validation(issues));
        }

        let graph = Graph::new(registry, self.graph_config());
        let mut session = match network {
            Some(net) => net.session(graph)?,
            None => Session::new(graph),
        };
        self.apply(&mut session)?;
        Ok(session)
    }
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self::new("untitled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TONE: &str = r#"
name = "tone"
sample_rate = 44100

[[instances]]
class = "sine"
label = "osc"
[instances.args]
freq = 440.0

[[instances]]
class = "meter"

[[audio]]
src = "osc.out"
dst = "meter0.in"
"#;

    #[test]
    fn endpoint_parses_instance_and_var() {
        let e: Endpoint = "osc.out".parse().unwrap();
        assert_eq!(e, Endpoint::new("osc", "out"));
        assert_eq!(e.to_string(), "osc.out");

        let nested: Endpoint = "a.b.c".parse().unwrap();
        assert_eq!(nested.instance, "a");
        assert_eq!(nested.var, "b.c");
    }

    #[test]
    fn endpoint_rejects_missing_halves() {
        for bad in ["osc", ".out", "osc.", ""] {
            assert!(
                matches!(bad.parse::<Endpoint>(), Err(ConfigError::InvalidEndpoint(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parses_program_with_defaults() {
        let program = ProgramConfig::from_toml(TONE).unwrap();
        assert_eq!(program.name, "tone");
        assert_eq!(program.sample_rate, 44100);
        assert_eq!(program.frames_per_cycle, 256);
        assert_eq!(program.instances.len(), 2);
        assert_eq!(program.instances[0].name(), "osc");
        assert_eq!(program.instances[1].name(), "meter");
        assert_eq!(program.audio[0].to_string(), "osc.out -> meter0.in");
        assert!(program.callbacks.is_empty());
        assert!(program.remote.is_empty());
    }

    #[test]
    fn malformed_endpoint_fails_to_parse() {
        let toml = r#"
name = "bad"
[[audio]]
src = "oscout"
dst = "meter0.in"
"#;
        assert!(matches!(
            ProgramConfig::from_toml(toml),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn args_convert_to_runtime_values() {
        let inst = InstanceConfig::new("counter")
            .with_arg("period", 4)
            .with_arg("big", 3_000_000_000_i64)
            .with_arg("gain", 0.5)
            .with_arg("on", true)
            .with_arg("name", "x");
        let args = inst.args().unwrap();
        assert_eq!(args.get("period"), Some(&Value::Int(4)));
        assert_eq!(args.get("big"), Some(&Value::UInt(3_000_000_000)));
        assert_eq!(args.get("gain"), Some(&Value::Double(0.5)));
        assert_eq!(args.get("on"), Some(&Value::Bool(true)));
        assert_eq!(args.get("name").and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn unsupported_args_are_rejected() {
        let inst = InstanceConfig::new("sine")
            .with_label("osc")
            .with_arg("freqs", toml::Value::Array(vec![1.into(), 2.into()]));
        let err = inst.args().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidArg { ref instance, ref arg, .. } if instance == "osc" && arg == "freqs"
        ));

        let huge = InstanceConfig::new("counter").with_arg("period", i64::MAX);
        assert!(huge.args().is_err());
    }

    #[test]
    fn toml_string_round_trip_keeps_everything() {
        let program = ProgramConfig::new("net")
            .with_instance(InstanceConfig::new("number").with_label("knob").with_arg("value", 2.5))
            .with_instance(InstanceConfig::new("probe"))
            .with_callback(LinkConfig::new(
                Endpoint::new("knob", "out"),
                Endpoint::new("probe0", "in"),
            ))
            .with_remote(RemoteConfig::new(
                Endpoint::new("knob", "out"),
                "right",
                Endpoint::new("probe", "in"),
            ));
        let text = program.to_toml().unwrap();
        assert!(text.contains("src = \"knob.out\""), "got:\n{text}");
        assert_eq!(ProgramConfig::from_toml(&text).unwrap(), program);
    }

    #[test]
    fn graph_config_follows_program() {
        let mut program = ProgramConfig::new("p");
        program.sample_rate = 44100;
        program.frames_per_cycle = 64;
        let config = program.graph_config();
        assert_eq!(config.sample_rate, 44100.0);
        assert_eq!(config.frames_per_cycle, 64);
    }
}
