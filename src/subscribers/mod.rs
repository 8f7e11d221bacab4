//! # Event subscribers for the notification hub.
//!
//! The hub publishes [`Event`](crate::Event)s on its [`Bus`](crate::Bus); a listener
//! task forwards them into a [`SubscriberSet`] that feeds every [`Subscribe`]r
//! through its own bounded queue.
//!
//! ```text
//! Registry / queues ── publish ──► Bus ──► hub listener ──► SubscriberSet::emit
//!                                                             ├──► LogWriter
//!                                                             └──► custom (metrics, alerts)
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
