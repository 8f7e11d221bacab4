//! # Example: broadcast
//!
//! Fan-out of job events to consumers living in two remote processes, with the
//! built-in [`LogWriter`] rendering hub events through `tracing`.
//!
//! Demonstrates how to:
//! - Implement [`ConsumerProxy`] for a (simulated) transport.
//! - Register consumers of different types on different server identities.
//! - Broadcast normal and high-priority [`Notification`]s.
//! - Drain everything with [`Hub::shut_consumer_queues_down`].
//!
//! ## Flow
//! ```text
//! broadcast(JobStatus, msg)
//!     ├─► ConsumerQueue(rip-01) ──► worker ──► Console("ui").invoke()
//!     └─► ConsumerQueue(rip-02) ──► worker ──► Console("audit").invoke()
//! shut_consumer_queues_down()
//!     ├─► DrainStarted
//!     └─► AllDrainedWithin
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example broadcast --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notihub::{
    Config, ConsumerProxy, ConsumerType, DeliveryError, Hub, Invocation, LogWriter, Notification, Priority,
    Subscribe,
};
use tracing_subscriber::EnvFilter;

/// Pretends to be a remote consumer reached over a slow link.
struct Console {
    name: &'static str,
    latency: Duration,
}

#[async_trait]
impl ConsumerProxy for Console {
    async fn invoke(&self, call: &Invocation) -> Result<(), DeliveryError> {
        tokio::time::sleep(self.latency).await;
        println!(
            "[{}] {}({})",
            self.name,
            call.method,
            String::from_utf8_lossy(&call.payload)
        );
        Ok(())
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let hub = Hub::builder(Config::default()).with_subscribers(subs).build();

    let ui = Arc::new(Console {
        name: "ui",
        latency: Duration::from_millis(20),
    });
    let audit = Arc::new(Console {
        name: "audit",
        latency: Duration::from_millis(50),
    });
    hub.register_consumer(ConsumerType::JobStatus, "rip-01:4410".into(), ui.clone())?;
    hub.register_consumer(ConsumerType::Progress, "rip-01:4410".into(), ui)?;
    hub.register_consumer(ConsumerType::JobStatus, "rip-02:4410".into(), audit)?;

    for job in 1..=3 {
        let msg = Notification::new("JobStatusChanged", format!("job {job} queued").into_bytes());
        hub.broadcast(ConsumerType::JobStatus, Arc::new(msg))?;
        for pct in [25, 50, 100] {
            let msg = Notification::new("ProgressChanged", format!("job {job} {pct}%").into_bytes());
            hub.broadcast(ConsumerType::Progress, Arc::new(msg))?;
        }
    }

    // Jumps ahead of everything still queued.
    let urgent = Notification::new("JobStatusChanged", b"job 2 aborted".to_vec()).with_priority(Priority::High);
    let report = hub.broadcast(ConsumerType::JobStatus, Arc::new(urgent))?;
    println!("urgent notice reached {}/{} consumers", report.enqueued, report.targets);

    hub.shut_consumer_queues_down().await?;
    Ok(())
}
