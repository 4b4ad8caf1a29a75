//! Fan-out of control state to observers

mod broadcaster;
mod snapshot;

pub use broadcaster::{StateBroadcaster, Subscription};
pub use snapshot::Snapshot;
