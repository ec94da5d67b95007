use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::instrument;

use crate::{
    readable_candidates, writable_candidates, ClientOptions, ReadPreference, ServerDescription,
    ServerProbe, TopologyDescription, TopologyWatcherError,
};

use super::{run_topology_watcher_actor, TopologyWatcherActor, TopologyWatcherMessage};

/**
A handle to the topology watcher actor.

The monitoring subsystem publishes probe results through [`TopologyWatcher::publish`]; readers
call [`TopologyWatcher::select_server`] or [`TopologyWatcher::topology`]. Cloning the handle is
cheap and shares the same actor. When the last handle is dropped the actor stops.

```rust
# tokio_test::block_on(async {
use mongo_topology::{ClientOptions, ReadPreference, ServerProbe, Timestamp, TopologyWatcher};

let options = ClientOptions::parse("mongodb://localhost:27017").unwrap();
let watcher = TopologyWatcher::new(options);

let probe = ServerProbe::new("localhost:27017", "Standalone", Timestamp::now());
watcher.publish("Single", vec![probe]).await.unwrap();

let server = watcher.select_server(Some(&ReadPreference::secondary())).await.unwrap();
assert_eq!(server.address().to_string(), "localhost:27017");
# })
```
*/
#[derive(Clone, Debug)]
pub struct TopologyWatcher {
    options: Arc<ClientOptions>,
    sender: mpsc::Sender<TopologyWatcherMessage>,
    snapshot: watch::Receiver<Arc<TopologyDescription>>,
}

impl TopologyWatcher {
    /// Spawns the actor on the current tokio runtime, starting from an unknown topology.
    pub fn new(options: ClientOptions) -> Self {
        let (sender, receiver) = mpsc::channel(8);
        let (snapshot_sender, snapshot) = watch::channel(Arc::new(
            TopologyDescription::unknown().with_heartbeat_frequency(options.heartbeat_frequency()),
        ));
        let actor =
            TopologyWatcherActor::new(receiver, snapshot_sender, options.heartbeat_frequency());
        tokio::spawn(run_topology_watcher_actor(actor));

        Self {
            options: Arc::new(options),
            sender,
            snapshot,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The snapshot current at the time of the call.
    pub fn topology(&self) -> Arc<TopologyDescription> {
        self.snapshot.borrow().clone()
    }

    /// Replaces the topology with one built from `probes`. Returns whether anything other
    /// than timestamps or round-trip times changed.
    #[instrument(level = "debug", name = "Actor Handle - Publish Snapshot", skip(self, probes))]
    pub async fn publish(
        &self,
        topology_type: &str,
        probes: Vec<ServerProbe>,
    ) -> Result<bool, TopologyWatcherError> {
        let (tx, rx) = oneshot::channel();

        tracing::trace!("Sending snapshot to actor");
        self.sender
            .send(TopologyWatcherMessage::PublishSnapshot {
                topology_type: topology_type.to_string(),
                probes,
                respond_to: tx,
            })
            .await
            .map_err(|_| TopologyWatcherError::ActorClosed)?;

        tracing::trace!("Waiting for oneshot to return");
        rx.await
            .context("TopologyWatcherActor task has been killed")?
    }

    /// Waits until a server suitable for reading with `read_preference` exists and picks one
    /// with the configured policy. Uses the configured default preference when `None`.
    #[instrument(level = "debug", name = "Actor Handle - Select Server", skip(self))]
    pub async fn select_server(
        &self,
        read_preference: Option<&ReadPreference>,
    ) -> Result<ServerDescription, TopologyWatcherError> {
        let read_preference = read_preference.unwrap_or_else(|| self.options.read_preference());
        read_preference.validate(self.options.heartbeat_frequency())?;

        let policy = self.options.selection_policy();
        self.wait_for_server(|topology| {
            let candidates = readable_candidates(topology, read_preference);
            policy.choose(&candidates).cloned()
        })
        .await
    }

    /// Waits until a writable server exists and picks one with the configured policy.
    #[instrument(level = "debug", name = "Actor Handle - Select Writable Server", skip(self))]
    pub async fn select_writable_server(&self) -> Result<ServerDescription, TopologyWatcherError> {
        let policy = self.options.selection_policy();
        self.wait_for_server(|topology| {
            let candidates = writable_candidates(topology);
            policy.choose(&candidates).cloned()
        })
        .await
    }

    /// Re-evaluates `pick` against each new snapshot until it yields a server or the server
    /// selection timeout elapses.
    async fn wait_for_server<F>(
        &self,
        mut pick: F,
    ) -> Result<ServerDescription, TopologyWatcherError>
    where
        F: FnMut(&TopologyDescription) -> Option<ServerDescription>,
    {
        let timeout = self.options.server_selection_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut snapshot = self.snapshot.clone();

        loop {
            let topology = snapshot.borrow_and_update().clone();
            if let Some(server) = pick(topology.as_ref()) {
                tracing::debug!("Selected server {}", server.address());
                return Ok(server);
            }

            tracing::debug!(
                "No suitable server in {} topology, waiting for the next snapshot",
                topology.topology_type()
            );
            match tokio::time::timeout_at(deadline, snapshot.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(TopologyWatcherError::ActorClosed),
                Err(_) => {
                    tracing::warn!("Server selection timed out after {:?}", timeout);
                    return Err(TopologyWatcherError::ServerSelectionTimeout {
                        timeout,
                        topology_type: topology.topology_type(),
                    });
                }
            }
        }
    }
}
