use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error_chain_fmt;

/// Errors produced while parsing a `host:port` string.
#[derive(thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Address `{0}` has an empty host")]
    EmptyHost(String),
    #[error("Address `{0}` is missing a port")]
    MissingPort(String),
    #[error("Address `{address}` has an invalid port `{port}`")]
    InvalidPort { address: String, port: String },
}
impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Identity of a single node in a deployment.
///
/// Two addresses are equal when host and port match exactly. Host comparison is case
/// sensitive; the host is kept as the monitoring subsystem reported it.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` string. The port segment is mandatory.
    ///
    /// IPv6 literals must be bracketed (`[::1]:27017`); the brackets are not kept in
    /// [`ServerAddress::host`].
    pub fn parse(address: &str) -> Result<Self, ParseError> {
        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| ParseError::MissingPort(address.to_string()))?;
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| ParseError::MissingPort(address.to_string()))?;
            (host, port)
        } else {
            address
                .rsplit_once(':')
                .ok_or_else(|| ParseError::MissingPort(address.to_string()))?
        };

        if host.is_empty() {
            return Err(ParseError::EmptyHost(address.to_string()));
        }
        if port.is_empty() {
            return Err(ParseError::MissingPort(address.to_string()));
        }

        let port = port.parse::<u16>().map_err(|_| ParseError::InvalidPort {
            address: address.to_string(),
            port: port.to_string(),
        })?;

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ServerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
