//! # Example: flaky_consumer
//!
//! One consumer drops a few calls and recovers through retries; another never
//! answers and is unregistered by the breaker.
//!
//! ## Flow
//! ```text
//! flaky: Err, Err, Ok      ─► RetryScheduled x2, then delivered
//! dead:  Err, Err, Err ... ─► ConsumerTripped ─► ConsumerUnregistered(breaker_tripped)
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example flaky_consumer
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use notihub::{Config, ConsumerProxy, ConsumerType, DeliveryError, EventKind, Hub, Invocation, Notification};

/// Fails the first `fail_first` calls, then accepts.
struct Flaky {
    fail_first: u32,
    calls: AtomicU32,
}

#[async_trait]
impl ConsumerProxy for Flaky {
    async fn invoke(&self, call: &Invocation) -> Result<(), DeliveryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(DeliveryError::failed(format!("link reset (call {})", n + 1)));
        }
        println!("[flaky] got {}", call.method);
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config {
        max_retries: 3,
        min_retry_delay: Duration::from_millis(20),
        max_retry_delay: Duration::from_millis(80),
        max_failed_messages: 3,
        ..Config::default()
    };
    let hub = Hub::builder(cfg).build();
    let mut events = hub.subscribe();

    let printer = tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            match ev.kind {
                EventKind::RetryScheduled => println!(
                    "[event] retry {:?} attempt={:?} in {:?}ms",
                    ev.consumer, ev.attempt, ev.delay_ms
                ),
                EventKind::ConsumerTripped => {
                    println!("[event] tripped {:?} after {:?} failures", ev.consumer, ev.attempt)
                }
                EventKind::ConsumerUnregistered => {
                    println!("[event] unregistered {:?} reason={:?}", ev.consumer, ev.reason)
                }
                EventKind::AllDrainedWithin | EventKind::GraceExceeded => {
                    println!("[event] {:?}", ev.kind);
                    break;
                }
                _ => {}
            }
        }
    });

    let flaky = Arc::new(Flaky {
        fail_first: 2,
        calls: AtomicU32::new(0),
    });
    let dead = Arc::new(Flaky {
        fail_first: u32::MAX,
        calls: AtomicU32::new(0),
    });
    hub.register_consumer(ConsumerType::Monitor, "rip-01:4410".into(), flaky)?;
    let dead_id = hub.register_consumer(ConsumerType::Monitor, "rip-02:4410".into(), dead)?;

    let note = Arc::new(Notification::new("MonitorText", b"spooler restarted".to_vec()));
    hub.broadcast(ConsumerType::Monitor, note)?;

    while hub.lookup(dead_id, None).is_ok() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("{dead_id} is gone");

    hub.shut_consumer_queues_down().await?;
    printer.await?;
    Ok(())
}
