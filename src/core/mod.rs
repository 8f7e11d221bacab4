//! Hub core: registration, per-identity queues, fan-out and teardown.
//!
//! The public entry point is [`Hub`], assembled by [`HubBuilder`].
//!
//! Internal modules:
//! - [`registry`]: consumer index, fan-out and the breaker's unregister listener;
//! - [`directory`]: one [`ConsumerQueue`](crate::ConsumerQueue) and worker per identity;
//! - [`shutdown`]: drain with a shared deadline;
//! - [`hub`]: the facade tying them together;
//! - [`builder`]: wiring of bus, subscribers and background tasks.

mod builder;
mod directory;
mod hub;
mod registry;
mod shutdown;

pub use builder::HubBuilder;
pub use directory::{DirectoryGuard, ProxyDirectory};
pub use hub::Hub;
pub use registry::{BroadcastReport, Registry};
