mod topology_watcher_actor;
mod topology_watcher_error;
mod topology_watcher_handle;
mod topology_watcher_helpers;

pub(crate) use topology_watcher_actor::*;
pub use topology_watcher_error::*;
pub use topology_watcher_handle::*;
pub(crate) use topology_watcher_helpers::*;
