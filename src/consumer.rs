//! # Consumer-side vocabulary.
//!
//! Types that identify consumers and the remote processes they live in, plus the
//! [`ConsumerProxy`] trait: the single seam through which the hub reaches the transport.
//!
//! ```text
//! ServerIdentity ──► one ConsumerQueue + worker
//!        │
//!        ├─► ConsumerId(1)  JobStatus  ──► Arc<dyn ConsumerProxy>
//!        └─► ConsumerId(7)  Progress   ──► Arc<dyn ConsumerProxy>
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DeliveryError;

/// Handle for one active registration.
///
/// Allocated monotonically by the registry; never reused within a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(pub(crate) u64);

impl ConsumerId {
    /// Raw numeric value, for logs and wire handles.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

/// Category of event a consumer registers for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumerType {
    /// Job status changes.
    JobStatus,
    /// Job progress updates.
    Progress,
    /// Monitor and log text.
    Monitor,
    /// Overall RIP status.
    RipStatus,
    /// Throughput and output events.
    Throughput,
}

impl ConsumerType {
    /// All consumer types, in declaration order.
    pub const ALL: [ConsumerType; 5] = [
        ConsumerType::JobStatus,
        ConsumerType::Progress,
        ConsumerType::Monitor,
        ConsumerType::RipStatus,
        ConsumerType::Throughput,
    ];

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConsumerType::JobStatus => "job_status",
            ConsumerType::Progress => "progress",
            ConsumerType::Monitor => "monitor",
            ConsumerType::RipStatus => "rip_status",
            ConsumerType::Throughput => "throughput",
        }
    }
}

/// Opaque key for one remote process/connection.
///
/// The transport decides what makes two identities equal by choosing the key text
/// (host + pid, connection id, ...). Cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerIdentity(Arc<str>);

impl ServerIdentity {
    /// Creates an identity from the transport's key.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerIdentity {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// One remote method call: the unit the transport knows how to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Remote method name.
    pub method: Arc<str>,
    /// Marshaled arguments; the format belongs to the business event.
    pub payload: Arc<[u8]>,
}

impl Invocation {
    /// Creates an invocation of `method` with an encoded payload.
    pub fn new(method: impl Into<Arc<str>>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            method: method.into(),
            payload: payload.into(),
        }
    }
}

/// Local stand-in for a remote consumer.
///
/// Implemented by the transport. Calls arrive from the worker of the consumer's
/// per-identity queue, one at a time per identity.
///
/// ### Implementation requirements
/// - Map transport failures to [`DeliveryError::Failed`]; do not panic.
/// - Enforce a transport-level timeout; a call that never returns stalls its queue
///   unless the hub's `delivery_timeout` is set.
#[async_trait]
pub trait ConsumerProxy: Send + Sync + 'static {
    /// Invokes `call` on the remote consumer.
    async fn invoke(&self, call: &Invocation) -> Result<(), DeliveryError>;

    /// Whether the proxy is bound to an endpoint. Unbound proxies are refused at
    /// registration.
    fn is_valid(&self) -> bool {
        true
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a consumer proxy.
pub type ConsumerRef = Arc<dyn ConsumerProxy>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        let mut labels: Vec<_> = ConsumerType::ALL.iter().map(|t| t.as_label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), ConsumerType::ALL.len());
    }

    #[test]
    fn identity_equality_follows_key() {
        assert_eq!(ServerIdentity::from("rip-01:4410"), ServerIdentity::new("rip-01:4410"));
        assert_ne!(ServerIdentity::from("rip-01:4410"), ServerIdentity::from("rip-01:4411"));
    }
}
