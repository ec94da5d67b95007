use std::{collections::HashSet, fmt};

use tracing::instrument;

use crate::{
    error_chain_fmt, staleness::HeartbeatFrequency, ServerAddress, ServerDescription,
};

/// Deployment-level shape of the cluster.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    LoadBalanced,
    #[default]
    Unknown,
}

impl TopologyType {
    const ALL: [TopologyType; 6] = [
        TopologyType::Single,
        TopologyType::ReplicaSetNoPrimary,
        TopologyType::ReplicaSetWithPrimary,
        TopologyType::Sharded,
        TopologyType::LoadBalanced,
        TopologyType::Unknown,
    ];

    /// Maps a reported topology type onto a [`TopologyType`], ignoring ASCII case.
    /// Unrecognized names become [`TopologyType::Unknown`].
    pub fn from_type_str(raw: &str) -> Self {
        match Self::ALL.iter().find(|t| t.as_str().eq_ignore_ascii_case(raw)) {
            Some(topology_type) => *topology_type,
            None => {
                tracing::warn!("Unrecognized topology type `{}`, treating as Unknown", raw);
                TopologyType::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyType::Single => "Single",
            TopologyType::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            TopologyType::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            TopologyType::Sharded => "Sharded",
            TopologyType::LoadBalanced => "LoadBalanced",
            TopologyType::Unknown => "Unknown",
        }
    }

    pub fn is_replica_set(&self) -> bool {
        matches!(
            self,
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary
        )
    }
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Server `{0}` appears more than once in the topology")]
    DuplicateAddress(ServerAddress),
    #[error("A ReplicaSetWithPrimary topology needs exactly one primary, found {0}")]
    PrimaryCount(usize),
    #[error("A Single topology needs exactly one server, found {0}")]
    SingleServerCount(usize),
}
impl fmt::Debug for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Immutable snapshot of every known server plus the deployment type.
///
/// A new snapshot is built each time the monitoring subsystem reports a change; callers hold
/// on to whichever snapshot they captured.
#[derive(Debug, Clone, Default)]
pub struct TopologyDescription {
    topology_type: TopologyType,
    servers: Vec<ServerDescription>,
    heartbeat_frequency: HeartbeatFrequency,
}

/// Builds a [`TopologyDescription`], checking only that addresses are unique and that the
/// primary and single-server counts agree with the topology type.
#[instrument(level = "debug", skip(servers), fields(server_count = servers.len()))]
pub fn build_topology_description(
    topology_type: &str,
    servers: Vec<ServerDescription>,
) -> Result<TopologyDescription, TopologyError> {
    let topology_type = TopologyType::from_type_str(topology_type);

    let mut seen = HashSet::new();
    for server in &servers {
        if !seen.insert(server.address()) {
            return Err(TopologyError::DuplicateAddress(server.address().clone()));
        }
    }

    match topology_type {
        TopologyType::ReplicaSetWithPrimary => {
            let primaries = servers.iter().filter(|s| s.is_primary()).count();
            if primaries != 1 {
                return Err(TopologyError::PrimaryCount(primaries));
            }
        }
        TopologyType::Single if servers.len() != 1 => {
            return Err(TopologyError::SingleServerCount(servers.len()));
        }
        _ => {}
    }

    Ok(TopologyDescription {
        topology_type,
        servers,
        heartbeat_frequency: HeartbeatFrequency::default(),
    })
}

impl TopologyDescription {
    /// An empty snapshot of unknown type, used before anything has been observed.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Replaces the heartbeat interval used when estimating staleness.
    pub fn with_heartbeat_frequency(mut self, heartbeat_frequency: HeartbeatFrequency) -> Self {
        self.heartbeat_frequency = heartbeat_frequency;
        self
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn servers(&self) -> &[ServerDescription] {
        &self.servers
    }

    pub fn heartbeat_frequency(&self) -> HeartbeatFrequency {
        self.heartbeat_frequency
    }

    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| s.address() == address)
    }

    pub fn primary(&self) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| s.is_primary())
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.iter().filter(|s| s.is_secondary())
    }

    /// Replica set name reported by the members. Only defined for replica-set topologies.
    pub fn set_name(&self) -> Option<&str> {
        if !self.topology_type.is_replica_set() {
            return None;
        }
        self.servers.iter().find_map(|s| s.set_name())
    }

    /// Smallest session timeout across all servers.
    ///
    /// A single server without a timeout disables sessions for the whole deployment.
    pub fn logical_session_timeout_minutes(&self) -> Option<i64> {
        self.servers
            .iter()
            .map(|s| s.logical_session_timeout_minutes())
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    pub fn supports_sessions(&self) -> bool {
        self.logical_session_timeout_minutes().is_some()
    }
}

/// Two snapshots are equal when they have the same type and the same servers, compared with
/// [`ServerDescription`] change equality and regardless of order.
impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        self.topology_type == other.topology_type
            && self.servers.len() == other.servers.len()
            && self
                .servers
                .iter()
                .all(|s| other.server(s.address()) == Some(s))
    }
}
impl Eq for TopologyDescription {}
