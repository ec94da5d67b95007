use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    build_server_description, build_topology_description, staleness::HeartbeatFrequency,
    ServerProbe, TopologyDescription, TopologyWatcherError,
};

use super::TopologyWatcherMessage;

/// Owns the write side of the snapshot channel. Every published snapshot is a brand new
/// [`TopologyDescription`]; readers keep whichever `Arc` they already hold.
pub(crate) struct TopologyWatcherActor {
    heartbeat_frequency: HeartbeatFrequency,
    receiver: mpsc::Receiver<TopologyWatcherMessage>,
    snapshot: watch::Sender<Arc<TopologyDescription>>,
}

impl TopologyWatcherActor {
    pub(crate) fn new(
        receiver: mpsc::Receiver<TopologyWatcherMessage>,
        snapshot: watch::Sender<Arc<TopologyDescription>>,
        heartbeat_frequency: HeartbeatFrequency,
    ) -> Self {
        Self {
            heartbeat_frequency,
            receiver,
            snapshot,
        }
    }

    /// Message handler for the TopologyWatcherActor
    #[instrument(
        level = "debug",
        name = "TopologyWatcher Actor - Handle Message",
        skip(self),
        fields(correlation_id)
    )]
    async fn handle_message(&mut self, msg: TopologyWatcherMessage) {
        // Apply a correlation id to all child spans of this message handler
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            TopologyWatcherMessage::PublishSnapshot {
                topology_type,
                probes,
                respond_to,
            } => {
                let result = self.publish_snapshot(&topology_type, &probes);
                if let Err(e) = &result {
                    tracing::error!("Rejected topology snapshot. Caused by: {}", e);
                }
                let _ = respond_to.send(result);
            }
        }
    }

    #[instrument(level = "debug", skip(self, probes), fields(probe_count = probes.len()))]
    fn publish_snapshot(
        &mut self,
        topology_type: &str,
        probes: &[ServerProbe],
    ) -> Result<bool, TopologyWatcherError> {
        let servers = probes
            .iter()
            .map(build_server_description)
            .collect::<Result<Vec<_>, _>>()?;
        let topology = build_topology_description(topology_type, servers)?
            .with_heartbeat_frequency(self.heartbeat_frequency);

        let changed = **self.snapshot.borrow() != topology;
        if changed {
            tracing::info!(
                "Topology changed: {} with {} servers",
                topology.topology_type(),
                topology.servers().len()
            );
        } else {
            tracing::trace!("Topology unchanged, refreshing snapshot timestamps");
        }

        // Always swap in the new snapshot: staleness depends on timestamps that change
        // equality ignores.
        self.snapshot.send_replace(Arc::new(topology));
        Ok(changed)
    }
}

#[instrument(level = "debug", name = "Running TopologyWatcher Actor", skip(actor))]
pub(crate) async fn run_topology_watcher_actor(mut actor: TopologyWatcherActor) {
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::debug!("All topology watcher handles dropped, stopping actor");
}
