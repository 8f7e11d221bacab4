//! # Drain of consumer queues at teardown.
//!
//! Polls each queue until it is empty with no delivery in flight, sharing one
//! deadline across all queues. A queue drained early is not polled again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};

use crate::consumer::ServerIdentity;
use crate::queue::ConsumerQueue;

/// Waits up to `grace` for every queue to go idle, checking every `poll`.
///
/// Returns the identities still busy at the deadline, sorted; empty when all
/// queues drained in time.
pub(crate) async fn drain_queues(
    queues: &[(ServerIdentity, Arc<ConsumerQueue>)],
    grace: Duration,
    poll: Duration,
) -> Vec<String> {
    let deadline = Instant::now() + grace;
    let mut pending: Vec<&(ServerIdentity, Arc<ConsumerQueue>)> = queues.iter().collect();

    loop {
        pending.retain(|(_, q)| !q.is_empty_and_actions_complete());
        if pending.is_empty() {
            return Vec::new();
        }

        let now = Instant::now();
        if now >= deadline {
            let mut stuck: Vec<String> = pending.iter().map(|(id, _)| id.to_string()).collect();
            stuck.sort_unstable();
            return stuck;
        }
        time::sleep(poll.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::Config;
    use crate::consumer::{ConsumerId, ConsumerProxy, ConsumerRef, Invocation};
    use crate::error::DeliveryError;
    use crate::events::Bus;
    use crate::message::{Delivery, MessageRef, Notification};

    struct Sleeps(Duration);

    #[async_trait]
    impl ConsumerProxy for Sleeps {
        async fn invoke(&self, _call: &Invocation) -> Result<(), DeliveryError> {
            time::sleep(self.0).await;
            Ok(())
        }
    }

    fn queue(name: &str, proxy: ConsumerRef) -> (ServerIdentity, Arc<ConsumerQueue>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = ServerIdentity::from(name);
        let q = Arc::new(ConsumerQueue::new(
            id.clone(),
            &Config::default(),
            Bus::new(8),
            tx,
            CancellationToken::new(),
        ));
        let msg: MessageRef = Arc::new(Notification::new("Progress", b"1".to_vec()));
        q.insert(Delivery::new(msg, proxy, ConsumerId(1), Arc::new(AtomicBool::new(true))));
        tokio::spawn(Arc::clone(&q).run_worker());
        (id, q)
    }

    #[tokio::test(start_paused = true)]
    async fn quick_queues_drain_within_grace() {
        let queues = vec![
            queue("a", Arc::new(Sleeps(Duration::from_millis(30)))),
            queue("b", Arc::new(Sleeps(Duration::from_millis(70)))),
        ];
        let stuck = drain_queues(&queues, Duration::from_secs(1), Duration::from_millis(10)).await;
        assert!(stuck.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_queue_is_named_at_the_deadline() {
        let queues = vec![
            queue("fast", Arc::new(Sleeps(Duration::from_millis(5)))),
            queue("stalled", Arc::new(Sleeps(Duration::from_secs(3600)))),
        ];
        let started = Instant::now();
        let stuck = drain_queues(&queues, Duration::from_millis(200), Duration::from_millis(10)).await;

        assert_eq!(stuck, vec!["stalled".to_string()]);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(queues[0].1.is_empty_and_actions_complete());
    }
}
