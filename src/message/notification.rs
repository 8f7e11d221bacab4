use async_trait::async_trait;

use crate::consumer::{ConsumerProxy, Invocation};
use crate::error::DeliveryError;
use crate::queue::Priority;

use super::ConsumerMessage;

/// A message that is exactly one remote method call.
///
/// Covers the common case where the business event already knows its method name
/// and encoded arguments.
#[derive(Clone, Debug)]
pub struct Notification {
    invocation: Invocation,
    priority: Priority,
}

impl Notification {
    /// Normal-priority notification calling `method` with `payload`.
    pub fn new(method: &str, payload: impl Into<std::sync::Arc<[u8]>>) -> Self {
        Self {
            invocation: Invocation::new(method, payload),
            priority: Priority::Normal,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }
}

#[async_trait]
impl ConsumerMessage for Notification {
    async fn deliver_to(&self, consumer: &dyn ConsumerProxy) -> Result<(), DeliveryError> {
        consumer.invoke(&self.invocation).await
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> &str {
        &self.invocation.method
    }
}
