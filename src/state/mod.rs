use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::Snapshot;

/// Latest published snapshot. Readers never block the poller.
pub type SharedState = Arc<ArcSwap<Snapshot>>;

/// Create a new shared state initialized with an empty snapshot.
pub fn new_shared_state() -> SharedState {
    Arc::new(ArcSwap::from_pointee(Snapshot::empty()))
}

/// Replace the published snapshot.
pub fn publish(state: &SharedState, snapshot: Snapshot) {
    state.store(Arc::new(snapshot));
}
