use std::{collections::HashMap, fmt, str::FromStr};

use crate::{error_chain_fmt, staleness::HeartbeatFrequency, ServerType};

/// Smallest bound a caller may request for `maxStalenessSeconds`.
pub const SMALLEST_MAX_STALENESS_SECONDS: i64 = 90;

/// How often a primary writes a no-op when idle, which bounds how precise a staleness
/// estimate can be.
pub const IDLE_WRITE_PERIOD_SECONDS: i64 = 10;

/// Labels a read preference targets. Every entry must be present on a server for it to match.
pub type TagSet = HashMap<String, String>;

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum ReadPreferenceError {
    #[error("Unknown read preference mode `{0}`")]
    UnknownMode(String),
    #[error("Read preference tag set `{0}` is malformed, expected `key:value` pairs")]
    InvalidTagSet(String),
    #[error("Tag sets cannot be used with the primary read preference")]
    TagSetsWithPrimary,
    #[error("maxStalenessSeconds cannot be used with the primary read preference")]
    MaxStalenessWithPrimary,
    #[error("maxStalenessSeconds of {requested} is below the minimum of {minimum}")]
    MaxStalenessTooSmall { requested: i64, minimum: i64 },
}
impl fmt::Debug for ReadPreferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ReadMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadMode::Primary => "primary",
            ReadMode::PrimaryPreferred => "primaryPreferred",
            ReadMode::Secondary => "secondary",
            ReadMode::SecondaryPreferred => "secondaryPreferred",
            ReadMode::Nearest => "nearest",
        }
    }

    /// Whether a server of the given type may serve a read in this mode.
    pub fn accepts(&self, server_type: ServerType) -> bool {
        match self {
            ReadMode::Primary => server_type == ServerType::RsPrimary,
            ReadMode::Secondary => server_type == ServerType::RsSecondary,
            ReadMode::PrimaryPreferred | ReadMode::SecondaryPreferred | ReadMode::Nearest => {
                matches!(server_type, ServerType::RsPrimary | ServerType::RsSecondary)
            }
        }
    }
}

impl FromStr for ReadMode {
    type Err = ReadPreferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ReadMode::Primary,
            ReadMode::PrimaryPreferred,
            ReadMode::Secondary,
            ReadMode::SecondaryPreferred,
            ReadMode::Nearest,
        ]
        .into_iter()
        .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ReadPreferenceError::UnknownMode(s.to_string()))
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller supplied criteria for choosing servers to read from.
///
/// Tag sets are tried in order. An empty list means no tag filtering. A staleness bound of
/// zero or less, or none at all, disables the staleness check.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadPreference {
    mode: ReadMode,
    tag_sets: Vec<TagSet>,
    max_staleness_seconds: Option<i64>,
}

impl ReadPreference {
    pub fn new(mode: ReadMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn primary() -> Self {
        Self::new(ReadMode::Primary)
    }

    pub fn primary_preferred() -> Self {
        Self::new(ReadMode::PrimaryPreferred)
    }

    pub fn secondary() -> Self {
        Self::new(ReadMode::Secondary)
    }

    pub fn secondary_preferred() -> Self {
        Self::new(ReadMode::SecondaryPreferred)
    }

    pub fn nearest() -> Self {
        Self::new(ReadMode::Nearest)
    }

    pub fn with_tag_sets(mut self, tag_sets: Vec<TagSet>) -> Self {
        self.tag_sets = tag_sets;
        self
    }

    pub fn with_max_staleness_seconds(mut self, seconds: i64) -> Self {
        self.max_staleness_seconds = Some(seconds);
        self
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn tag_sets(&self) -> &[TagSet] {
        &self.tag_sets
    }

    pub fn max_staleness_seconds(&self) -> Option<i64> {
        self.max_staleness_seconds
    }

    /// The staleness bound, only when it is actually enforced.
    pub fn enforced_max_staleness_seconds(&self) -> Option<i64> {
        self.max_staleness_seconds.filter(|s| *s > 0)
    }

    /// Checks the combination of settings is one a server would accept.
    ///
    /// Selection itself never calls this; it evaluates whatever it is given.
    pub fn validate(
        &self,
        heartbeat_frequency: HeartbeatFrequency,
    ) -> Result<(), ReadPreferenceError> {
        if self.mode == ReadMode::Primary {
            if self.tag_sets.iter().any(|t| !t.is_empty()) {
                return Err(ReadPreferenceError::TagSetsWithPrimary);
            }
            if self.enforced_max_staleness_seconds().is_some() {
                return Err(ReadPreferenceError::MaxStalenessWithPrimary);
            }
        }

        if let Some(requested) = self.enforced_max_staleness_seconds() {
            let heartbeat_floor = heartbeat_frequency
                .as_secs_ceil_i64()
                .saturating_add(IDLE_WRITE_PERIOD_SECONDS);
            let minimum = SMALLEST_MAX_STALENESS_SECONDS.max(heartbeat_floor);
            if requested < minimum {
                return Err(ReadPreferenceError::MaxStalenessTooSmall { requested, minimum });
            }
        }

        Ok(())
    }
}

/// Parses one `readPreferenceTags` value such as `dc:ny,rack:1`. An empty value is the
/// empty tag set.
pub fn parse_tag_set(raw: &str) -> Result<TagSet, ReadPreferenceError> {
    if raw.trim().is_empty() {
        return Ok(TagSet::new());
    }

    raw.split(',')
        .map(|pair| {
            pair.split_once(':')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| ReadPreferenceError::InvalidTagSet(raw.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use std::time::Duration;

    use super::*;

    fn heartbeat(secs: u64) -> HeartbeatFrequency {
        HeartbeatFrequency::new(Duration::from_secs(secs)).unwrap()
    }

    #[test]
    fn accepts_maps_modes_to_roles() {
        assert!(ReadMode::Primary.accepts(ServerType::RsPrimary));
        assert!(!ReadMode::Primary.accepts(ServerType::RsSecondary));
        assert!(ReadMode::Secondary.accepts(ServerType::RsSecondary));
        assert!(!ReadMode::Secondary.accepts(ServerType::RsPrimary));
        for mode in [
            ReadMode::PrimaryPreferred,
            ReadMode::SecondaryPreferred,
            ReadMode::Nearest,
        ] {
            assert!(mode.accepts(ServerType::RsPrimary));
            assert!(mode.accepts(ServerType::RsSecondary));
            assert!(!mode.accepts(ServerType::RsArbiter));
            assert!(!mode.accepts(ServerType::Mongos));
        }
    }

    #[test]
    fn read_mode_parses_case_insensitively() {
        assert_eq!(
            "secondarypreferred".parse::<ReadMode>(),
            Ok(ReadMode::SecondaryPreferred)
        );
        assert_eq!(
            "closest".parse::<ReadMode>(),
            Err(ReadPreferenceError::UnknownMode("closest".to_string()))
        );
    }

    #[test]
    fn enforced_max_staleness_ignores_zero_and_negative_values() {
        assert_eq!(
            ReadPreference::secondary()
                .with_max_staleness_seconds(0)
                .enforced_max_staleness_seconds(),
            None
        );
        assert_eq!(
            ReadPreference::secondary()
                .with_max_staleness_seconds(-1)
                .enforced_max_staleness_seconds(),
            None
        );
        assert_eq!(
            ReadPreference::secondary()
                .with_max_staleness_seconds(120)
                .enforced_max_staleness_seconds(),
            Some(120)
        );
    }

    #[test]
    fn validate_rejects_tags_or_staleness_with_primary() {
        // Arrange
        let tagged = ReadPreference::primary()
            .with_tag_sets(vec![TagSet::from([("dc".to_string(), "ny".to_string())])]);
        let stale = ReadPreference::primary().with_max_staleness_seconds(120);
        let empty_tag_set = ReadPreference::primary().with_tag_sets(vec![TagSet::new()]);

        // Assert
        assert_eq!(
            tagged.validate(heartbeat(10)),
            Err(ReadPreferenceError::TagSetsWithPrimary)
        );
        assert_eq!(
            stale.validate(heartbeat(10)),
            Err(ReadPreferenceError::MaxStalenessWithPrimary)
        );
        assert!(empty_tag_set.validate(heartbeat(10)).is_ok());
    }

    #[test]
    fn validate_enforces_smallest_max_staleness() {
        // Arrange
        let pref = ReadPreference::secondary().with_max_staleness_seconds(89);

        // Assert
        assert_eq!(
            pref.validate(heartbeat(10)),
            Err(ReadPreferenceError::MaxStalenessTooSmall {
                requested: 89,
                minimum: 90
            })
        );
        assert!(ReadPreference::secondary()
            .with_max_staleness_seconds(90)
            .validate(heartbeat(10))
            .is_ok());
    }

    #[test]
    fn validate_accounts_for_heartbeat_frequency() {
        // Arrange
        let pref = ReadPreference::nearest().with_max_staleness_seconds(90);

        // Act
        let result = pref.validate(heartbeat(120));

        // Assert
        assert_eq!(
            result,
            Err(ReadPreferenceError::MaxStalenessTooSmall {
                requested: 90,
                minimum: 130
            })
        );
    }

    #[test]
    fn validate_with_huge_heartbeat_rejects_every_bound() {
        // Arrange
        let heartbeat = HeartbeatFrequency::new(Duration::MAX).unwrap();
        let pref = ReadPreference::secondary().with_max_staleness_seconds(i64::MAX - 1);

        // Act
        let result = pref.validate(heartbeat);

        // Assert
        assert_eq!(
            result,
            Err(ReadPreferenceError::MaxStalenessTooSmall {
                requested: i64::MAX - 1,
                minimum: i64::MAX
            })
        );
    }

    #[test]
    fn parse_tag_set_reads_pairs_and_empty_values() {
        assert_eq!(
            parse_tag_set("dc:ny,rack:1").unwrap(),
            TagSet::from([
                ("dc".to_string(), "ny".to_string()),
                ("rack".to_string(), "1".to_string())
            ])
        );
        assert_eq!(parse_tag_set("").unwrap(), TagSet::new());
        assert!(matches!(
            parse_tag_set("dc"),
            Err(ReadPreferenceError::InvalidTagSet(_))
        ));
    }
}
