use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::consumer::{ConsumerId, ConsumerRef};
use crate::error::DeliveryError;
use crate::queue::{Deliver, QueueItem};

use super::MessageRef;

/// A message bound to one consumer: the payload of a consumer queue.
///
/// Holds one reference to the shared message; the message is dropped when its last
/// delivery is. `live` is shared with the registration and goes `false` when the
/// consumer is unregistered, so queued deliveries to it are skipped.
pub struct Delivery {
    message: MessageRef,
    consumer: ConsumerRef,
    consumer_id: ConsumerId,
    live: Arc<AtomicBool>,
    retries: u32,
}

impl Delivery {
    pub(crate) fn new(
        message: MessageRef,
        consumer: ConsumerRef,
        consumer_id: ConsumerId,
        live: Arc<AtomicBool>,
    ) -> Self {
        Self {
            message,
            consumer,
            consumer_id,
            live,
            retries: 0,
        }
    }

    pub fn message(&self) -> &MessageRef {
        &self.message
    }

    pub fn consumer(&self) -> &ConsumerRef {
        &self.consumer
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Retries already spent on this delivery.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether the target registration still exists.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn bump_retries(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    /// Wraps the delivery in a queue item at its message's priority.
    pub(crate) fn into_item(self) -> QueueItem<Self> {
        let priority = self.message.priority();
        QueueItem::new(self).with_priority(priority)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message.name())
            .field("consumer", &self.consumer_id)
            .field("retries", &self.retries)
            .field("live", &self.is_live())
            .finish()
    }
}

#[async_trait]
impl Deliver for Delivery {
    async fn deliver(&self) -> Result<(), DeliveryError> {
        if !self.is_live() {
            return Err(DeliveryError::Revoked);
        }
        self.message.deliver_to(self.consumer.as_ref()).await
    }
}
