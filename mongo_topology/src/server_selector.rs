//! Decides which servers may serve a read or a write for a given topology snapshot.
//!
//! Everything here is a pure function of the snapshot and the read preference. Picking one
//! server out of the candidates is left to a [`SelectionPolicy`].

use std::{fmt, time::Duration};

use dyn_clone::DynClone;
use rand::seq::IteratorRandom;
use tracing::instrument;

use crate::{
    read_preference::{ReadMode, ReadPreference, TagSet},
    staleness::staleness,
    ServerDescription, TopologyDescription, TopologyType,
};

/// Servers that satisfy `read_preference`'s mode, staleness bound and tag sets, in the order
/// the topology lists them.
///
/// The staleness bound is only applied to replica-set topologies. A candidate whose
/// staleness cannot be estimated is dropped.
#[instrument(
    level = "debug",
    skip_all,
    fields(topology_type = %topology.topology_type(), mode = %read_preference.mode())
)]
pub fn suitable_read_servers<'a>(
    topology: &'a TopologyDescription,
    read_preference: &ReadPreference,
) -> Vec<&'a ServerDescription> {
    let mode = read_preference.mode();
    let mut candidates = topology
        .servers()
        .iter()
        .filter(|s| mode.accepts(s.server_type()))
        .collect::<Vec<_>>();

    if let Some(max_staleness) = read_preference.enforced_max_staleness_seconds() {
        if topology.topology_type().is_replica_set() {
            candidates.retain(|candidate| match staleness(candidate, topology) {
                Some(s) => s <= max_staleness as f64,
                None => false,
            });
            tracing::trace!(
                "{} candidates within {}s staleness",
                candidates.len(),
                max_staleness
            );
        }
    }

    let candidates = filter_by_tag_sets(candidates, read_preference);
    tracing::debug!("Found {} suitable read servers", candidates.len());
    candidates
}

/// Keeps the candidates matching the first tag set that any candidate matches.
///
/// Outside [`ReadMode::Nearest`], a primary satisfies every tag set.
fn filter_by_tag_sets<'a>(
    candidates: Vec<&'a ServerDescription>,
    read_preference: &ReadPreference,
) -> Vec<&'a ServerDescription> {
    if read_preference.tag_sets().is_empty() {
        return candidates;
    }

    let matches = |candidate: &ServerDescription, tag_set: &TagSet| {
        (candidate.is_primary() && read_preference.mode() != ReadMode::Nearest)
            || candidate.matches_tag_set(tag_set)
    };

    for tag_set in read_preference.tag_sets() {
        let matched = candidates
            .iter()
            .copied()
            .filter(|c| matches(*c, tag_set))
            .collect::<Vec<_>>();
        if !matched.is_empty() {
            tracing::trace!("Tag set {:?} matched {} candidates", tag_set, matched.len());
            return matched;
        }
    }

    tracing::trace!("No candidate matched any tag set");
    Vec::new()
}

/// Whether a read with `read_preference` could be routed anywhere in this snapshot.
pub fn has_readable_server(
    topology: &TopologyDescription,
    read_preference: &ReadPreference,
) -> bool {
    match topology.topology_type() {
        TopologyType::Unknown => false,
        TopologyType::Single | TopologyType::Sharded | TopologyType::LoadBalanced => true,
        TopologyType::ReplicaSetNoPrimary => {
            read_preference.mode() != ReadMode::Primary
                && !suitable_read_servers(topology, read_preference).is_empty()
        }
        TopologyType::ReplicaSetWithPrimary => {
            read_preference.mode() == ReadMode::Primary
                || !suitable_read_servers(topology, read_preference).is_empty()
        }
    }
}

/// Whether a write could be routed anywhere in this snapshot.
pub fn has_writable_server(topology: &TopologyDescription) -> bool {
    matches!(
        topology.topology_type(),
        TopologyType::Single | TopologyType::ReplicaSetWithPrimary | TopologyType::LoadBalanced
    )
}

/// Servers a read may actually be sent to.
///
/// Replica sets use [`suitable_read_servers`]. A single topology offers its one server;
/// sharded and load-balanced topologies offer every data-bearing server.
pub fn readable_candidates<'a>(
    topology: &'a TopologyDescription,
    read_preference: &ReadPreference,
) -> Vec<&'a ServerDescription> {
    if !has_readable_server(topology, read_preference) {
        return Vec::new();
    }
    match topology.topology_type() {
        TopologyType::Single => topology.servers().iter().collect(),
        t if t.is_replica_set() => suitable_read_servers(topology, read_preference),
        _ => topology
            .servers()
            .iter()
            .filter(|s| s.server_type().is_data_bearing())
            .collect(),
    }
}

/// Servers a write may actually be sent to.
pub fn writable_candidates(topology: &TopologyDescription) -> Vec<&ServerDescription> {
    if !has_writable_server(topology) {
        return Vec::new();
    }
    match topology.topology_type() {
        TopologyType::Single => topology.servers().iter().collect(),
        TopologyType::ReplicaSetWithPrimary => topology.primary().into_iter().collect(),
        _ => topology
            .servers()
            .iter()
            .filter(|s| s.server_type().is_data_bearing())
            .collect(),
    }
}

/// Picks one server out of a candidate set.
pub trait SelectionPolicy: DynClone + fmt::Debug + Send + Sync {
    fn choose<'a>(&self, candidates: &[&'a ServerDescription]) -> Option<&'a ServerDescription>;
}
dyn_clone::clone_trait_object!(SelectionPolicy);

/// Chooses at random among the candidates whose round-trip time is within
/// `local_threshold` of the fastest one.
///
/// Candidates without a measured round-trip time are only considered when none has one.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LatencyWindow {
    local_threshold: Duration,
}

impl LatencyWindow {
    pub const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

    pub fn new(local_threshold: Duration) -> Self {
        Self { local_threshold }
    }

    pub fn local_threshold(&self) -> Duration {
        self.local_threshold
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOCAL_THRESHOLD)
    }
}

impl SelectionPolicy for LatencyWindow {
    fn choose<'a>(&self, candidates: &[&'a ServerDescription]) -> Option<&'a ServerDescription> {
        let fastest = candidates.iter().filter_map(|c| c.round_trip_time()).min();
        let chosen = match fastest {
            Some(fastest) => {
                let ceiling = fastest + self.local_threshold;
                candidates
                    .iter()
                    .filter(|c| c.round_trip_time().is_some_and(|rtt| rtt <= ceiling))
                    .choose(&mut rand::thread_rng())
            }
            None => candidates.iter().choose(&mut rand::thread_rng()),
        };
        chosen.copied()
    }
}

/// Chooses uniformly among all candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomChoice;

impl SelectionPolicy for RandomChoice {
    fn choose<'a>(&self, candidates: &[&'a ServerDescription]) -> Option<&'a ServerDescription> {
        candidates.iter().choose(&mut rand::thread_rng()).copied()
    }
}
