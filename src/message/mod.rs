//! Messages and the adapter that puts them on consumer queues.
//!
//! ## Contents
//! - [`ConsumerMessage`] one business event, shared by every consumer it fans out to
//! - [`Notification`] ready-made message that maps to one remote method call
//! - [`Delivery`] queue payload binding a message to one consumer
//!
//! ```text
//! broadcast(type, Arc<dyn ConsumerMessage>)
//!   ├─► Delivery { message: clone, consumer A } ──► ConsumerQueue(identity A)
//!   └─► Delivery { message: clone, consumer B } ──► ConsumerQueue(identity B)
//!
//! the message is dropped with its last Delivery
//! ```

mod delivery;
mod notification;

use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::ConsumerProxy;
use crate::error::DeliveryError;
use crate::queue::Priority;

pub use delivery::Delivery;
pub use notification::Notification;

/// # One business event bound for every consumer of a type.
///
/// A message is shared behind an `Arc` by all deliveries of one broadcast and
/// must therefore not hold per-consumer state.
///
/// ### Implementation requirements
/// - [`deliver_to`](Self::deliver_to) may run several times for the same consumer
///   (retries) and concurrently for consumers on different identities.
/// - Return [`DeliveryError::Failed`] for transport errors; panics are caught but
///   count against the consumer.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use notihub::{ConsumerMessage, ConsumerProxy, DeliveryError, Invocation, Priority};
///
/// struct JobFinished { job: u32 }
///
/// #[async_trait]
/// impl ConsumerMessage for JobFinished {
///     async fn deliver_to(&self, consumer: &dyn ConsumerProxy) -> Result<(), DeliveryError> {
///         let call = Invocation::new("JobStatusChanged", self.job.to_be_bytes().to_vec());
///         consumer.invoke(&call).await
///     }
///
///     fn priority(&self) -> Priority {
///         Priority::High
///     }
/// }
/// ```
#[async_trait]
pub trait ConsumerMessage: Send + Sync + 'static {
    /// Sends this message to one consumer.
    async fn deliver_to(&self, consumer: &dyn ConsumerProxy) -> Result<(), DeliveryError>;

    /// Queue priority of every delivery of this message.
    ///
    /// `High` messages bypass the queue length limit.
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a message.
pub type MessageRef = Arc<dyn ConsumerMessage>;
