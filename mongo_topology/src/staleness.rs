//! Estimates how far a secondary's data lags behind the freshest node in its replica set.
//!
//! The estimate only uses timestamps already carried by the snapshot; nothing here reads a
//! clock.

use std::time::Duration;

use tracing::instrument;

use crate::{error_chain_fmt, ServerDescription, ServerType, TopologyDescription, TopologyType};

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum HeartbeatFrequencyError {
    #[error("Heartbeat frequency of {requested_ms}ms is below the minimum of {minimum_ms}ms")]
    TooSmall { requested_ms: u128, minimum_ms: u128 },
}
impl std::fmt::Debug for HeartbeatFrequencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Interval at which the monitoring subsystem refreshes each node.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct HeartbeatFrequency(Duration);

impl HeartbeatFrequency {
    pub const DEFAULT: HeartbeatFrequency = HeartbeatFrequency(Duration::from_secs(60));
    pub const MINIMUM: Duration = Duration::from_millis(500);

    /// Rejects intervals shorter than [`HeartbeatFrequency::MINIMUM`].
    pub fn new(frequency: Duration) -> Result<Self, HeartbeatFrequencyError> {
        if frequency < Self::MINIMUM {
            return Err(HeartbeatFrequencyError::TooSmall {
                requested_ms: frequency.as_millis(),
                minimum_ms: Self::MINIMUM.as_millis(),
            });
        }
        Ok(Self(frequency))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// The interval in whole milliseconds, saturating at `i64::MAX`.
    pub fn as_millis_i64(&self) -> i64 {
        i64::try_from(self.0.as_millis()).unwrap_or(i64::MAX)
    }

    /// The interval in seconds rounded up, saturating at `i64::MAX`.
    pub fn as_secs_ceil_i64(&self) -> i64 {
        let secs = self.0.as_secs().saturating_add(u64::from(self.0.subsec_nanos() > 0));
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}

impl Default for HeartbeatFrequency {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Estimated staleness of `candidate`, in seconds.
///
/// Returns `None` outside replica-set topologies, when a timestamp the estimate needs is
/// missing, or when the timestamps are too far apart to compare. Anything that is not a
/// secondary has a staleness of exactly zero.
#[instrument(level = "trace", skip_all, fields(candidate = %candidate.address()))]
pub fn staleness(candidate: &ServerDescription, topology: &TopologyDescription) -> Option<f64> {
    if !topology.topology_type().is_replica_set() {
        return None;
    }
    if candidate.server_type() != ServerType::RsSecondary {
        return Some(0.0);
    }

    let heartbeat_ms = topology.heartbeat_frequency().as_millis_i64();
    let candidate_write = candidate.last_write_date()?;

    let lag_ms = match topology.topology_type() {
        TopologyType::ReplicaSetWithPrimary => {
            let primary = topology.primary()?;
            let primary_write = primary.last_write_date()?;
            let client_to_server = candidate.last_update_time().millis_since(candidate_write);
            let client_to_primary = primary.last_update_time().millis_since(primary_write);
            client_to_server
                .zip(client_to_primary)
                .and_then(|(server, primary)| server.checked_sub(primary))
        }
        _ => topology
            .secondaries()
            .filter_map(|s| s.last_write_date())
            .max()?
            .millis_since(candidate_write),
    };
    let staleness_ms = match lag_ms.and_then(|lag| lag.checked_add(heartbeat_ms)) {
        Some(ms) => ms,
        None => {
            tracing::warn!("Timestamps are too far apart to estimate staleness");
            return None;
        }
    };

    let seconds = staleness_ms as f64 / 1000.0;
    tracing::trace!("Estimated staleness: {}s", seconds);
    Some(seconds)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        build_server_description, build_topology_description, server_description::LastWrite,
        ServerProbe, Timestamp,
    };

    const T: i64 = 1_700_000_000_000;

    fn member(
        address: &str,
        role: &str,
        last_write: Option<i64>,
        last_update: i64,
    ) -> ServerDescription {
        let mut probe = ServerProbe::new(address, role, Timestamp::from_millis(last_update));
        probe.set_name = Some("rs0".to_string());
        probe.last_write = last_write.map(|millis| LastWrite {
            last_write_date: Timestamp::from_millis(millis),
        });
        build_server_description(&probe).unwrap()
    }

    fn topology(
        topology_type: &str,
        servers: Vec<ServerDescription>,
        heartbeat_secs: u64,
    ) -> TopologyDescription {
        let heartbeat = HeartbeatFrequency::new(Duration::from_secs(heartbeat_secs)).unwrap();
        build_topology_description(topology_type, servers)
            .unwrap()
            .with_heartbeat_frequency(heartbeat)
    }

    #[test]
    fn heartbeat_frequency_rejects_values_below_minimum() {
        assert!(HeartbeatFrequency::new(Duration::from_millis(499)).is_err());
        assert!(HeartbeatFrequency::new(Duration::from_millis(500)).is_ok());
        assert_eq!(
            HeartbeatFrequency::default().as_duration(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn heartbeat_frequency_conversions_saturate() {
        let huge = HeartbeatFrequency::new(Duration::MAX).unwrap();
        let fractional = HeartbeatFrequency::new(Duration::from_millis(10_001)).unwrap();

        assert_eq!(huge.as_millis_i64(), i64::MAX);
        assert_eq!(huge.as_secs_ceil_i64(), i64::MAX);
        assert_eq!(fractional.as_millis_i64(), 10_001);
        assert_eq!(fractional.as_secs_ceil_i64(), 11);
    }

    #[test]
    fn staleness_is_undefined_when_timestamps_overflow() {
        // Arrange
        let primary = member("p:1", "RSPrimary", Some(T), T);
        let secondary = member("s:1", "RSSecondary", Some(i64::MIN), i64::MAX);
        let with_primary = topology(
            "ReplicaSetWithPrimary",
            vec![primary, secondary.clone()],
            10,
        );
        let fresh = member("a:1", "RSSecondary", Some(i64::MAX), T);
        let ancient = member("b:1", "RSSecondary", Some(i64::MIN), T);
        let without_primary = topology("ReplicaSetNoPrimary", vec![fresh, ancient.clone()], 10);

        // Act
        let with_primary_estimate = staleness(&secondary, &with_primary);
        let without_primary_estimate = staleness(&ancient, &without_primary);

        // Assert
        assert_eq!(with_primary_estimate, None);
        assert_eq!(without_primary_estimate, None);
    }

    #[test]
    fn staleness_with_huge_heartbeat_is_not_truncated() {
        // Arrange
        let primary = member("p:1", "RSPrimary", Some(T), T);
        let secondary = member("s:1", "RSSecondary", Some(T - 100_000), T);
        let heartbeat = HeartbeatFrequency::new(Duration::from_millis(u64::MAX)).unwrap();
        let topology = build_topology_description(
            "ReplicaSetWithPrimary",
            vec![primary, secondary.clone()],
        )
        .unwrap()
        .with_heartbeat_frequency(heartbeat);

        // Act
        let result = staleness(&secondary, &topology);

        // Assert
        assert_eq!(result, None);
    }

    #[test]
    fn staleness_with_primary_uses_relative_refresh_lag() {
        // Arrange
        let primary = member("p:1", "RSPrimary", Some(T), T + 1_000);
        let secondary = member("s:1", "RSSecondary", Some(T - 10_000), T + 1_000);
        let topology = topology(
            "ReplicaSetWithPrimary",
            vec![primary, secondary.clone()],
            10,
        );

        // Act
        let result = staleness(&secondary, &topology);

        // Assert
        assert_eq!(result, Some(20.0));
    }

    #[test]
    fn staleness_without_primary_measures_against_freshest_secondary() {
        // Arrange
        let fresh = member("a:1", "RSSecondary", Some(T), T);
        let lagging = member("b:1", "RSSecondary", Some(T - 30_000), T);
        let topology = topology("ReplicaSetNoPrimary", vec![fresh.clone(), lagging.clone()], 10);

        // Assert
        assert_eq!(staleness(&lagging, &topology), Some(40.0));
        assert_eq!(staleness(&fresh, &topology), Some(10.0));
    }

    #[test]
    fn staleness_is_undefined_when_a_write_date_is_missing() {
        // Arrange
        let primary = member("p:1", "RSPrimary", None, T);
        let secondary = member("s:1", "RSSecondary", Some(T), T);
        let no_write = member("n:1", "RSSecondary", None, T);
        let with_primary = topology(
            "ReplicaSetWithPrimary",
            vec![primary, secondary.clone(), no_write.clone()],
            10,
        );
        let without_primary = topology("ReplicaSetNoPrimary", vec![no_write.clone()], 10);

        // Assert
        assert_eq!(staleness(&secondary, &with_primary), None);
        assert_eq!(staleness(&no_write, &with_primary), None);
        assert_eq!(staleness(&no_write, &without_primary), None);
    }

    #[test]
    fn staleness_of_non_secondaries_is_zero() {
        // Arrange
        let primary = member("p:1", "RSPrimary", None, T);
        let arbiter = member("a:1", "RSArbiter", None, T);
        let servers = vec![primary.clone(), arbiter.clone()];
        let topology = topology("ReplicaSetWithPrimary", servers, 10);

        // Assert
        assert_eq!(staleness(&primary, &topology), Some(0.0));
        assert_eq!(staleness(&arbiter, &topology), Some(0.0));
    }

    #[test]
    fn staleness_is_undefined_outside_replica_sets() {
        // Arrange
        let standalone = member("a:1", "Standalone", Some(T), T);
        let single = topology("Single", vec![standalone.clone()], 10);

        // Assert
        assert_eq!(staleness(&standalone, &single), None);
    }
}
