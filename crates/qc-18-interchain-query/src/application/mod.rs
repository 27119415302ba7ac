//! # Application Layer
//!
//! Pending query store, origin-side relay dispatcher and host-side executor.

pub mod dispatcher;
pub mod host;
pub mod store;

pub use dispatcher::{spawn_sweeper, OutcomeReceiver, RelayDispatcher};
pub use host::QueryHost;
pub use store::PendingQueryStore;
