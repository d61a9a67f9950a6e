use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use archcat_core::RequestContext;
use archcat_events::{BusError, EventBus, EventHandler, PublishedEvent};

enum Job {
    Deliver {
        ctx: RequestContext,
        events: Vec<PublishedEvent>,
    },
    Flush(mpsc::Sender<()>),
}

/// Asynchronous delivery in front of another bus.
///
/// `publish` only enqueues (blocking while the bounded queue is full) and returns; a
/// single named worker thread hands batches to the inner bus in enqueue order. Handler
/// failures are logged by the worker and never reach the publisher.
///
/// Read models therefore lag the write path. Call [`QueuedEventBus::flush`] to wait
/// until everything enqueued so far has been delivered.
///
/// Subscriptions are forwarded to the inner bus.
pub struct QueuedEventBus<B> {
    inner: Arc<B>,
    sender: Mutex<Option<SyncSender<Job>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<B> QueuedEventBus<B>
where
    B: EventBus + 'static,
{
    pub fn spawn(name: &'static str, inner: B, capacity: usize) -> Result<Self, BusError> {
        let inner = Arc::new(inner);
        let (tx, rx) = mpsc::sync_channel::<Job>(capacity.max(1));

        let worker_bus = inner.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, worker_bus, rx))
            .map_err(|e| BusError::Unavailable(format!("failed to spawn {name}: {e}")))?;

        Ok(Self {
            inner,
            sender: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn sender(&self) -> Result<SyncSender<Job>, BusError> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| BusError::Unavailable("queued event bus is shut down".to_string()))
    }

    /// Block until every batch enqueued before this call has been delivered.
    pub fn flush(&self) -> Result<(), BusError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.sender()?
            .send(Job::Flush(ack_tx))
            .map_err(|_| BusError::Unavailable("queue worker stopped".to_string()))?;
        ack_rx
            .recv()
            .map_err(|_| BusError::Unavailable("queue worker stopped".to_string()))
    }

    /// Deliver what is queued, stop the worker and wait for it. Later publishes fail.
    pub fn shutdown(&self) {
        // Dropping the last sender lets the worker drain the queue and exit.
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let join = self
            .join
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(join) = join {
            if join.join().is_err() {
                error!("queued event bus worker panicked");
            }
        }
    }
}

impl<B> Drop for QueuedEventBus<B> {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Some(join) = self.join.get_mut().ok().and_then(Option::take) {
            let _ = join.join();
        }
    }
}

impl<B> EventBus for QueuedEventBus<B>
where
    B: EventBus + 'static,
{
    fn publish(&self, ctx: &RequestContext, events: &[PublishedEvent]) -> Result<(), BusError> {
        if events.is_empty() {
            return Ok(());
        }
        self.sender()?
            .send(Job::Deliver {
                ctx: ctx.clone(),
                events: events.to_vec(),
            })
            .map_err(|_| BusError::Unavailable("queue worker stopped".to_string()))
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.inner.subscribe(event_type, handler)
    }

    fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        self.inner.subscribe_all(handler)
    }
}

impl<B> core::fmt::Debug for QueuedEventBus<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let running = self
            .sender
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false);
        f.debug_struct("QueuedEventBus")
            .field("running", &running)
            .finish()
    }
}

fn worker_loop<B: EventBus>(name: &'static str, bus: Arc<B>, rx: Receiver<Job>) {
    let tick = Duration::from_millis(250);

    loop {
        match rx.recv_timeout(tick) {
            Ok(Job::Deliver { ctx, events }) => {
                if let Err(err) = bus.publish(&ctx, &events) {
                    warn!(
                        worker = name,
                        error = %err,
                        correlation_id = %ctx.correlation_id(),
                        "queued delivery failed; read models may be stale until replay"
                    );
                }
            }
            Ok(Job::Flush(ack)) => {
                let _ = ack.send(());
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "queued event bus worker stopped");
}
