use tokio::sync::oneshot;

use crate::{ServerProbe, TopologyWatcherError};

#[derive(Debug)]
pub(crate) enum TopologyWatcherMessage {
    /// Replaces the current snapshot with one built from the given probes. Responds with
    /// whether the new snapshot differs from the previous one.
    PublishSnapshot {
        topology_type: String,
        probes: Vec<ServerProbe>,
        respond_to: oneshot::Sender<Result<bool, TopologyWatcherError>>,
    },
}
