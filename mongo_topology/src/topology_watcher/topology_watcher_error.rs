use std::time::Duration;

use crate::{error_chain_fmt, ParseError, ReadPreferenceError, TopologyError, TopologyType};

#[derive(thiserror::Error)]
pub enum TopologyWatcherError {
    #[error("No suitable server found within {timeout:?} (topology type {topology_type})")]
    ServerSelectionTimeout {
        timeout: Duration,
        topology_type: TopologyType,
    },
    #[error("The topology watcher has shut down")]
    ActorClosed,
    #[error(transparent)]
    InvalidReadPreference(#[from] ReadPreferenceError),
    #[error(transparent)]
    InvalidServerDescription(#[from] ParseError),
    #[error(transparent)]
    InvalidTopology(#[from] TopologyError),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for TopologyWatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
