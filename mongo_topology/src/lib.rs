/*!
mongo_topology is the client-side topology model and server-selection core of a MongoDB
client. It tracks what the monitoring subsystem last observed about each node of a
standalone, replica set or sharded deployment, and decides which nodes may serve a read
for a given [`ReadPreference`].

The core is made of pure functions over immutable snapshots:

* [`build_server_description`] turns one probe result into a [`ServerDescription`].
* [`build_topology_description`] aggregates those into a [`TopologyDescription`].
* [`suitable_read_servers`], [`has_readable_server`] and [`has_writable_server`] answer
  selection questions against one snapshot.

Nothing in the core performs I/O or reads a clock. The [`TopologyWatcher`] actor is a thin
async shell around it: the monitoring subsystem publishes new snapshots through it, and
callers wait on it for a suitable server until their server selection timeout elapses.

# Example
```rust
use mongo_topology::{
    build_server_description, build_topology_description, suitable_read_servers,
    ReadPreference, ServerProbe, Timestamp,
};

let primary = ServerProbe::new("a:27017", "RSPrimary", Timestamp::from_millis(0));
let secondary = ServerProbe::new("b:27017", "RSSecondary", Timestamp::from_millis(0));
let servers = vec![
    build_server_description(&primary).unwrap(),
    build_server_description(&secondary).unwrap(),
];
let topology = build_topology_description("ReplicaSetWithPrimary", servers).unwrap();

let candidates = suitable_read_servers(&topology, &ReadPreference::secondary());
assert_eq!(candidates.len(), 1);
```
*/

mod client_options;
mod server_address;
mod server_description;
mod timestamp;
mod topology_description;
mod topology_watcher;

pub mod read_preference;
pub mod server_selector;
pub mod staleness;

pub use client_options::*;
pub use read_preference::{ReadMode, ReadPreference, ReadPreferenceError, TagSet};
pub use server_address::*;
pub use server_description::*;
pub use server_selector::{
    has_readable_server, has_writable_server, readable_candidates, suitable_read_servers,
    writable_candidates, LatencyWindow, RandomChoice, SelectionPolicy,
};
pub use staleness::{staleness, HeartbeatFrequency, HeartbeatFrequencyError};
pub use timestamp::*;
pub use topology_description::*;
pub use topology_watcher::{TopologyWatcher, TopologyWatcherError};

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use crate::{
        build_server_description, build_topology_description, has_readable_server,
        has_writable_server, server_description::LastWrite, staleness, suitable_read_servers,
        HeartbeatFrequency, ReadPreference, ServerProbe, TagSet, Timestamp, TopologyError,
        TopologyWatcherError,
    };
    use std::time::Duration;

    const T: i64 = 1_600_000_000_000;

    fn probe(
        address: &str,
        role: &str,
        last_write: i64,
        last_update: i64,
        region: &str,
    ) -> ServerProbe {
        let mut probe = ServerProbe::new(address, role, Timestamp::from_millis(last_update));
        probe.last_write = Some(LastWrite {
            last_write_date: Timestamp::from_millis(last_write),
        });
        probe.tags = TagSet::from([("region".to_string(), region.to_string())]);
        probe
    }

    #[test]
    fn secondary_staleness_and_bound_end_to_end() {
        // Arrange
        let servers = vec![
            build_server_description(&probe("p:1", "RSPrimary", T, T + 1_000, "east")).unwrap(),
            build_server_description(&probe("s:1", "RSSecondary", T - 10_000, T + 1_000, "east"))
                .unwrap(),
        ];
        let topology = build_topology_description("ReplicaSetWithPrimary", servers)
            .unwrap()
            .with_heartbeat_frequency(HeartbeatFrequency::new(Duration::from_secs(10)).unwrap());
        let bounded = ReadPreference::secondary().with_max_staleness_seconds(5);

        // Act
        let estimate = staleness(&topology.servers()[1], &topology);
        let candidates = suitable_read_servers(&topology, &bounded);

        // Assert
        assert_eq!(estimate, Some(20.0));
        assert!(candidates.is_empty());
        assert!(!has_readable_server(&topology, &bounded));
        assert!(has_writable_server(&topology));
    }

    #[test]
    fn error_chain_fmt_prints_every_cause() {
        // Arrange
        let error = TopologyWatcherError::UnexpectedError(
            anyhow::Error::new(TopologyError::PrimaryCount(2)).context("publishing snapshot"),
        );

        // Act
        let rendered = format!("{:?}", error);

        // Assert
        assert!(rendered.starts_with("publishing snapshot"));
        assert!(rendered.contains(
            "Caused by:\n\tA ReplicaSetWithPrimary topology needs exactly one primary, found 2"
        ));
    }
}
