//! # Adapters
//!
//! Implementations of the outbound ports.

pub mod clock;
pub mod in_memory_transport;
pub mod mock_host;

pub use clock::{ManualClock, SystemClock};
pub use in_memory_transport::InMemoryTransport;
pub use mock_host::MockHostChain;
