use std::time::Duration;

use tracing::instrument;

use crate::{
    error_chain_fmt,
    read_preference::{parse_tag_set, ReadMode, ReadPreference, ReadPreferenceError},
    server_selector::{LatencyWindow, SelectionPolicy},
    staleness::{HeartbeatFrequency, HeartbeatFrequencyError},
    ParseError, ServerAddress,
};

/// Port assumed for seed hosts that do not name one.
pub const DEFAULT_PORT: u16 = 27017;

const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECTION_STRING_SCHEME: &str = "mongodb://";

#[derive(thiserror::Error)]
pub enum ClientOptionsError {
    #[error("No hosts were supplied and a client can't exist without at least one")]
    MissingHosts,
    #[error("Connection string `{0}` does not start with `mongodb://`")]
    InvalidScheme(String),
    #[error(transparent)]
    InvalidHeartbeatFrequency(#[from] HeartbeatFrequencyError),
    #[error("Option `{name}` has an invalid value `{value}`")]
    InvalidOption { name: String, value: String },
    #[error(transparent)]
    InvalidHost(#[from] ParseError),
    #[error(transparent)]
    InvalidReadPreference(#[from] ReadPreferenceError),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for ClientOptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Validated settings the topology shell runs with.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    hosts: Vec<ServerAddress>,
    heartbeat_frequency: HeartbeatFrequency,
    local_threshold: Duration,
    server_selection_timeout: Duration,
    read_preference: ReadPreference,
    selection_policy: Box<dyn SelectionPolicy>,
}

impl ClientOptions {
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// Parses a `mongodb://host1[:port1][,host2[:port2]...][/database][?options]` string.
    ///
    /// Credentials and the database path are accepted but ignored. Recognized options are
    /// `heartbeatFrequencyMS`, `localThresholdMS`, `serverSelectionTimeoutMS`,
    /// `readPreference`, `readPreferenceTags` (repeatable) and `maxStalenessSeconds`.
    #[instrument(level = "debug", name = "Parse connection string", skip(connection_string))]
    pub fn parse(connection_string: &str) -> Result<Self, ClientOptionsError> {
        let rest = connection_string
            .strip_prefix(CONNECTION_STRING_SCHEME)
            .ok_or_else(|| ClientOptionsError::InvalidScheme(connection_string.to_string()))?;

        let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
        let authority = authority.split('/').next().unwrap_or_default();
        let hosts = match authority.rsplit_once('@') {
            Some((_credentials, hosts)) => hosts,
            None => authority,
        };
        let hosts = hosts.split(',').filter(|h| !h.is_empty()).collect::<Vec<_>>();

        let mut builder = ClientOptionsBuilder::new().set_hosts(&hosts);
        let mut mode = None;
        let mut tag_sets = Vec::new();
        let mut max_staleness_seconds = None;

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.to_ascii_lowercase().as_str() {
                "heartbeatfrequencyms" => {
                    let millis = parse_number::<u64>(&name, &value)?;
                    builder = builder.set_heartbeat_frequency(Duration::from_millis(millis));
                }
                "localthresholdms" => {
                    let millis = parse_number::<u64>(&name, &value)?;
                    builder = builder.set_local_threshold(Duration::from_millis(millis));
                }
                "serverselectiontimeoutms" => {
                    let millis = parse_number::<u64>(&name, &value)?;
                    builder = builder.set_server_selection_timeout(Duration::from_millis(millis));
                }
                "readpreference" => mode = Some(value.parse::<ReadMode>()?),
                "readpreferencetags" => tag_sets.push(parse_tag_set(&value)?),
                "maxstalenessseconds" => {
                    max_staleness_seconds = match parse_number::<i64>(&name, &value)? {
                        -1 => None,
                        seconds if seconds < 0 => {
                            return Err(ClientOptionsError::InvalidOption {
                                name: name.to_string(),
                                value: value.to_string(),
                            })
                        }
                        seconds => Some(seconds),
                    };
                }
                _ => tracing::warn!("Ignoring unsupported connection string option `{}`", name),
            }
        }

        if mode.is_some() || !tag_sets.is_empty() || max_staleness_seconds.is_some() {
            let mut read_preference =
                ReadPreference::new(mode.unwrap_or_default()).with_tag_sets(tag_sets);
            if let Some(seconds) = max_staleness_seconds {
                read_preference = read_preference.with_max_staleness_seconds(seconds);
            }
            builder = builder.set_read_preference(read_preference);
        }

        builder.build()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ClientOptionsError> {
    value.parse::<T>().map_err(|_| ClientOptionsError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
    })
}

// Getters
impl ClientOptions {
    pub fn hosts(&self) -> &[ServerAddress] {
        &self.hosts
    }

    pub fn heartbeat_frequency(&self) -> HeartbeatFrequency {
        self.heartbeat_frequency
    }

    pub fn local_threshold(&self) -> Duration {
        self.local_threshold
    }

    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    pub fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    pub fn selection_policy(&self) -> &dyn SelectionPolicy {
        self.selection_policy.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct ClientOptionsBuilder {
    hosts: Vec<String>,
    heartbeat_frequency: Option<Duration>,
    local_threshold: Option<Duration>,
    server_selection_timeout: Option<Duration>,
    read_preference: Option<ReadPreference>,
    selection_policy: Option<Box<dyn SelectionPolicy>>,
}

impl ClientOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds seed hosts. A host without a port uses [`DEFAULT_PORT`].
    pub fn set_hosts<T>(mut self, hosts: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        for h in hosts {
            self.hosts.push(h.as_ref().to_string());
        }
        self
    }

    pub fn set_heartbeat_frequency(mut self, heartbeat_frequency: Duration) -> Self {
        self.heartbeat_frequency = Some(heartbeat_frequency);
        self
    }

    pub fn set_local_threshold(mut self, local_threshold: Duration) -> Self {
        self.local_threshold = Some(local_threshold);
        self
    }

    pub fn set_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    pub fn set_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    /// Replaces the default [`LatencyWindow`] policy.
    pub fn set_selection_policy(mut self, policy: impl SelectionPolicy + 'static) -> Self {
        self.selection_policy = Some(Box::new(policy));
        self
    }

    /// Validates the settings and produces [`ClientOptions`].
    ///
    /// The builder is left untouched so it can act as a template for further clients.
    #[instrument(level = "debug", name = "Build ClientOptions", skip(self))]
    pub fn build(&self) -> Result<ClientOptions, ClientOptionsError> {
        if self.hosts.is_empty() {
            tracing::error!("No hosts were supplied and a client can't exist without at least one");
            return Err(ClientOptionsError::MissingHosts);
        }

        let hosts = self
            .hosts
            .iter()
            .map(|h| parse_seed(h))
            .collect::<Result<Vec<_>, _>>()?;

        let heartbeat_frequency = match self.heartbeat_frequency {
            Some(frequency) => HeartbeatFrequency::new(frequency)?,
            None => HeartbeatFrequency::default(),
        };

        let read_preference = self.read_preference.clone().unwrap_or_default();
        read_preference.validate(heartbeat_frequency).map_err(|e| {
            tracing::error!("Invalid read preference. Caused by: {}", e);
            e
        })?;

        let local_threshold = self
            .local_threshold
            .unwrap_or(LatencyWindow::DEFAULT_LOCAL_THRESHOLD);
        let selection_policy = match &self.selection_policy {
            Some(policy) => policy.clone(),
            None => Box::new(LatencyWindow::new(local_threshold)),
        };

        let options = ClientOptions {
            hosts,
            heartbeat_frequency,
            local_threshold,
            server_selection_timeout: self
                .server_selection_timeout
                .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT),
            read_preference,
            selection_policy,
        };

        tracing::trace!("Client options: {:?}", &options);
        Ok(options)
    }
}

/// Parses a seed host, falling back to [`DEFAULT_PORT`] when no port is given.
fn parse_seed(host: &str) -> Result<ServerAddress, ParseError> {
    match ServerAddress::parse(host) {
        Err(ParseError::MissingPort(_)) if !host.ends_with(':') => {
            let bare = host.trim_start_matches('[').trim_end_matches(']');
            if bare.is_empty() {
                return Err(ParseError::EmptyHost(host.to_string()));
            }
            Ok(ServerAddress::new(bare, DEFAULT_PORT))
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{read_preference::TagSet, server_selector::RandomChoice};

    #[test]
    fn build_applies_defaults() {
        // Act
        let options = ClientOptions::builder().set_hosts(&["a:1"]).build().unwrap();

        // Assert
        assert_eq!(options.hosts(), &[ServerAddress::new("a", 1)]);
        assert_eq!(options.heartbeat_frequency(), HeartbeatFrequency::default());
        assert_eq!(options.local_threshold(), Duration::from_millis(15));
        assert_eq!(options.server_selection_timeout(), Duration::from_secs(30));
        assert_eq!(options.read_preference(), &ReadPreference::primary());
    }

    #[test]
    fn build_fails_if_no_hosts() {
        let options = ClientOptions::builder().build();

        assert!(matches!(options, Err(ClientOptionsError::MissingHosts)));
    }

    #[test]
    fn build_rejects_heartbeat_below_minimum() {
        // Act
        let options = ClientOptions::builder()
            .set_hosts(&["a:1"])
            .set_heartbeat_frequency(Duration::from_millis(100))
            .build();

        // Assert
        assert!(matches!(
            options,
            Err(ClientOptionsError::InvalidHeartbeatFrequency(
                HeartbeatFrequencyError::TooSmall {
                    requested_ms: 100,
                    minimum_ms: 500
                }
            ))
        ));
    }

    #[test]
    fn build_rejects_invalid_read_preference() {
        let options = ClientOptions::builder()
            .set_hosts(&["a:1"])
            .set_read_preference(ReadPreference::secondary().with_max_staleness_seconds(5))
            .build();

        assert!(matches!(
            options,
            Err(ClientOptionsError::InvalidReadPreference(
                ReadPreferenceError::MaxStalenessTooSmall { .. }
            ))
        ));
    }

    #[test]
    fn build_can_be_called_repeatedly_with_a_custom_policy() {
        // Arrange
        let builder = ClientOptions::builder()
            .set_hosts(&["a:1"])
            .set_selection_policy(RandomChoice);

        // Assert
        assert!(builder.build().is_ok());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn parse_seed_applies_default_port() {
        assert_eq!(parse_seed("db").unwrap(), ServerAddress::new("db", DEFAULT_PORT));
        assert_eq!(parse_seed("[::1]").unwrap(), ServerAddress::new("::1", DEFAULT_PORT));
        assert!(parse_seed("db:").is_err());
        assert!(parse_seed("db:x").is_err());
    }

    #[test]
    fn parse_reads_hosts_and_options() {
        // Arrange
        let connection_string = "mongodb://user:pw@a:27018,b/admin?readPreference=secondaryPreferred\
            &readPreferenceTags=dc:ny,rack:1&readPreferenceTags=&maxStalenessSeconds=120\
            &heartbeatFrequencyMS=10000&localThresholdMS=5&serverSelectionTimeoutMS=2000&appName=x";

        // Act
        let options = ClientOptions::parse(connection_string).unwrap();

        // Assert
        assert_eq!(
            options.hosts(),
            &[ServerAddress::new("a", 27018), ServerAddress::new("b", 27017)]
        );
        assert_eq!(
            options.heartbeat_frequency().as_duration(),
            Duration::from_secs(10)
        );
        assert_eq!(options.local_threshold(), Duration::from_millis(5));
        assert_eq!(options.server_selection_timeout(), Duration::from_secs(2));
        assert_eq!(
            options.read_preference(),
            &ReadPreference::secondary_preferred()
                .with_tag_sets(vec![
                    TagSet::from([
                        ("dc".to_string(), "ny".to_string()),
                        ("rack".to_string(), "1".to_string())
                    ]),
                    TagSet::new()
                ])
                .with_max_staleness_seconds(120)
        );
    }

    #[test]
    fn parse_checks_max_staleness_against_a_huge_heartbeat() {
        // Arrange
        let connection_string = "mongodb://a?heartbeatFrequencyMS=18446744073709551615\
            &readPreference=secondary&maxStalenessSeconds=120";

        // Act
        let options = ClientOptions::parse(connection_string);

        // Assert
        assert!(matches!(
            options,
            Err(ClientOptionsError::InvalidReadPreference(
                ReadPreferenceError::MaxStalenessTooSmall {
                    requested: 120,
                    minimum: 18_446_744_073_709_562
                }
            ))
        ));
    }

    #[test]
    fn parse_treats_negative_one_max_staleness_as_unset() {
        let connection_string = "mongodb://a?readPreference=nearest&maxStalenessSeconds=-1";
        let options = ClientOptions::parse(connection_string).unwrap();

        assert_eq!(options.read_preference(), &ReadPreference::nearest());
    }

    #[test]
    fn parse_fails_for_wrong_scheme_and_bad_values() {
        assert!(matches!(
            ClientOptions::parse("http://a:1"),
            Err(ClientOptionsError::InvalidScheme(_))
        ));
        assert!(matches!(
            ClientOptions::parse("mongodb://a:1?heartbeatFrequencyMS=soon"),
            Err(ClientOptionsError::InvalidOption { .. })
        ));
        assert!(matches!(
            ClientOptions::parse("mongodb://a:1?readPreference=closest"),
            Err(ClientOptionsError::InvalidReadPreference(
                ReadPreferenceError::UnknownMode(_)
            ))
        ));
        assert!(matches!(
            ClientOptions::parse("mongodb://a:1?maxStalenessSeconds=-7"),
            Err(ClientOptionsError::InvalidOption { .. })
        ));
        assert!(matches!(
            ClientOptions::parse("mongodb://"),
            Err(ClientOptionsError::MissingHosts)
        ));
    }
}
