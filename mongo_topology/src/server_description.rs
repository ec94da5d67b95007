use std::{collections::HashMap, fmt, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{read_preference::TagSet, ParseError, ServerAddress, Timestamp};

/// Role a node reported for itself.
///
/// Roles a newer server reports that this client does not know degrade to
/// [`ServerType::Unknown`] instead of failing construction.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ServerType {
    Standalone,
    Mongos,
    PossiblePrimary,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    RsOther,
    RsGhost,
    LoadBalancer,
    #[default]
    Unknown,
}

impl ServerType {
    const ALL: [ServerType; 10] = [
        ServerType::Standalone,
        ServerType::Mongos,
        ServerType::PossiblePrimary,
        ServerType::RsPrimary,
        ServerType::RsSecondary,
        ServerType::RsArbiter,
        ServerType::RsOther,
        ServerType::RsGhost,
        ServerType::LoadBalancer,
        ServerType::Unknown,
    ];

    /// Maps a reported role string onto a [`ServerType`], ignoring ASCII case.
    pub fn from_role(role: &str) -> Self {
        match Self::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(role))
        {
            Some(server_type) => *server_type,
            None => {
                tracing::warn!("Unrecognized server role `{}`, treating as Unknown", role);
                ServerType::Unknown
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Standalone => "Standalone",
            ServerType::Mongos => "Mongos",
            ServerType::PossiblePrimary => "PossiblePrimary",
            ServerType::RsPrimary => "RSPrimary",
            ServerType::RsSecondary => "RSSecondary",
            ServerType::RsArbiter => "RSArbiter",
            ServerType::RsOther => "RSOther",
            ServerType::RsGhost => "RSGhost",
            ServerType::LoadBalancer => "LoadBalancer",
            ServerType::Unknown => "Unknown",
        }
    }

    /// Whether a node of this type can serve operations at all.
    pub fn is_data_bearing(&self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::Mongos
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::LoadBalancer
        )
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque election identifier reported by a primary.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElectionId(pub String);

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastWrite {
    pub last_write_date: Timestamp,
}

/// Raw result of probing one node, as handed over by the monitoring subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProbe {
    pub address: String,
    #[serde(rename = "type", default)]
    pub role: String,
    #[serde(default)]
    pub min_wire_version: i32,
    #[serde(default)]
    pub max_wire_version: i32,
    pub round_trip_time_ms: Option<u64>,
    pub last_write: Option<LastWrite>,
    pub last_update_time: Timestamp,
    pub me: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub arbiters: Vec<String>,
    #[serde(default)]
    pub passives: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub set_name: Option<String>,
    pub set_version: Option<i64>,
    pub election_id: Option<ElectionId>,
    pub primary: Option<String>,
    pub logical_session_timeout_minutes: Option<i64>,
}

impl ServerProbe {
    /// A probe carrying only identity, role and refresh time.
    pub fn new(
        address: impl Into<String>,
        role: impl Into<String>,
        last_update_time: Timestamp,
    ) -> Self {
        Self {
            address: address.into(),
            role: role.into(),
            min_wire_version: 0,
            max_wire_version: 0,
            round_trip_time_ms: None,
            last_write: None,
            last_update_time,
            me: None,
            hosts: Vec::new(),
            arbiters: Vec::new(),
            passives: Vec::new(),
            tags: HashMap::new(),
            set_name: None,
            set_version: None,
            election_id: None,
            primary: None,
            logical_session_timeout_minutes: None,
        }
    }

    /// Decodes a probe from its JSON rendering.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("Unable to deserialize server probe")
    }
}

/// Snapshot of one node's observed state.
///
/// Immutable once built. Equality compares what matters for change detection and ignores
/// the refresh time, the last write date and the round-trip time.
#[derive(Debug, Clone)]
pub struct ServerDescription {
    address: ServerAddress,
    server_type: ServerType,
    min_wire_version: i32,
    max_wire_version: i32,
    round_trip_time: Option<Duration>,
    last_write_date: Option<Timestamp>,
    last_update_time: Timestamp,
    me: Option<ServerAddress>,
    hosts: Vec<ServerAddress>,
    arbiters: Vec<ServerAddress>,
    passives: Vec<ServerAddress>,
    tags: HashMap<String, String>,
    set_name: Option<String>,
    set_version: Option<i64>,
    election_id: Option<ElectionId>,
    primary: Option<ServerAddress>,
    logical_session_timeout_minutes: Option<i64>,
}

/// Builds a [`ServerDescription`] from a probe.
///
/// Fails only when one of the addresses in the probe is not a valid `host:port`.
#[instrument(level = "debug", skip(probe), fields(address = %probe.address))]
pub fn build_server_description(probe: &ServerProbe) -> Result<ServerDescription, ParseError> {
    let address = ServerAddress::parse(&probe.address)?;
    let mut server_type = ServerType::from_role(&probe.role);
    let (mut min_wire_version, mut max_wire_version) =
        (probe.min_wire_version, probe.max_wire_version);

    if min_wire_version > max_wire_version {
        tracing::warn!(
            "Server {} reported wire versions {}..{}, treating as Unknown",
            address,
            min_wire_version,
            max_wire_version
        );
        server_type = ServerType::Unknown;
        min_wire_version = 0;
        max_wire_version = 0;
    }

    let description = ServerDescription {
        address,
        server_type,
        min_wire_version,
        max_wire_version,
        round_trip_time: probe.round_trip_time_ms.map(Duration::from_millis),
        last_write_date: probe.last_write.as_ref().map(|w| w.last_write_date),
        last_update_time: probe.last_update_time,
        me: probe.me.as_deref().map(ServerAddress::parse).transpose()?,
        hosts: parse_addresses(&probe.hosts)?,
        arbiters: parse_addresses(&probe.arbiters)?,
        passives: parse_addresses(&probe.passives)?,
        tags: probe.tags.clone(),
        set_name: probe.set_name.clone(),
        set_version: probe.set_version,
        election_id: probe.election_id.clone(),
        primary: probe.primary.as_deref().map(ServerAddress::parse).transpose()?,
        logical_session_timeout_minutes: probe.logical_session_timeout_minutes,
    };

    tracing::trace!("Built server description: {:?}", &description);
    Ok(description)
}

fn parse_addresses(raw: &[String]) -> Result<Vec<ServerAddress>, ParseError> {
    raw.iter().map(|a| ServerAddress::parse(a)).collect()
}

// Getters
impl ServerDescription {
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn min_wire_version(&self) -> i32 {
        self.min_wire_version
    }

    pub fn max_wire_version(&self) -> i32 {
        self.max_wire_version
    }

    pub fn round_trip_time(&self) -> Option<Duration> {
        self.round_trip_time
    }

    pub fn last_write_date(&self) -> Option<Timestamp> {
        self.last_write_date
    }

    pub fn last_update_time(&self) -> Timestamp {
        self.last_update_time
    }

    pub fn me(&self) -> Option<&ServerAddress> {
        self.me.as_ref()
    }

    pub fn hosts(&self) -> &[ServerAddress] {
        &self.hosts
    }

    pub fn arbiters(&self) -> &[ServerAddress] {
        &self.arbiters
    }

    pub fn passives(&self) -> &[ServerAddress] {
        &self.passives
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    pub fn set_version(&self) -> Option<i64> {
        self.set_version
    }

    pub fn election_id(&self) -> Option<&ElectionId> {
        self.election_id.as_ref()
    }

    pub fn primary(&self) -> Option<&ServerAddress> {
        self.primary.as_ref()
    }

    pub fn logical_session_timeout_minutes(&self) -> Option<i64> {
        self.logical_session_timeout_minutes
    }
}

impl ServerDescription {
    pub fn is_primary(&self) -> bool {
        self.server_type == ServerType::RsPrimary
    }

    pub fn is_secondary(&self) -> bool {
        self.server_type == ServerType::RsSecondary
    }

    /// Every key of `tag_set` must be present in this server's tags with the same value.
    /// An empty tag set matches any server.
    pub fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        tag_set
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.server_type == other.server_type
            && self.min_wire_version == other.min_wire_version
            && self.max_wire_version == other.max_wire_version
            && self.me == other.me
            && self.hosts == other.hosts
            && self.arbiters == other.arbiters
            && self.passives == other.passives
            && self.tags == other.tags
            && self.set_name == other.set_name
            && self.set_version == other.set_version
            && self.election_id == other.election_id
            && self.primary == other.primary
            && self.logical_session_timeout_minutes == other.logical_session_timeout_minutes
    }
}
impl Eq for ServerDescription {}
