use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// One serialized unit of work, run with exclusive access to the state.
pub type Unit<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Single-consumer serializer for scheduler state.
///
/// Every mutation of scheduler state is wrapped as a unit of work and
/// submitted here instead of running on the callback thread. Units execute
/// on exactly one consumer, in submission order, never overlapping, which
/// removes the need for locks across the scheduler's state.
pub struct Stanchion<S> {
    tx: mpsc::UnboundedSender<Unit<S>>,
}

impl<S> Clone for Stanchion<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> Stanchion<S> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Unit<S>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a unit of work. Fire-and-forget: the caller never blocks on
    /// its execution. Units submitted after the consumer stopped are dropped.
    pub fn schedule(&self, unit: impl FnOnce(&mut S) + Send + 'static) {
        if self.tx.send(Box::new(unit)).is_err() {
            tracing::warn!("Serializer is stopped, dropping unit of work");
        }
    }

    /// Enqueue a no-op unit and wait for it to run. Everything scheduled
    /// before this call has completed once it returns.
    pub async fn drained(&self) {
        let (tx, rx) = oneshot::channel();
        self.schedule(move |_| {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// Consume units until the channel closes or `shutdown` fires.
    ///
    /// A panic inside a unit is caught and logged; the loop keeps draining
    /// subsequent units.
    pub async fn run(
        mut state: S,
        mut rx: mpsc::UnboundedReceiver<Unit<S>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                maybe_unit = rx.recv() => {
                    let Some(unit) = maybe_unit else {
                        tracing::debug!("Serializer channel closed, stopping");
                        break;
                    };
                    if catch_unwind(AssertUnwindSafe(|| unit(&mut state))).is_err() {
                        tracing::error!("Unit of work panicked; consumer keeps draining");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Serializer shutting down");
                    break;
                }
            }
        }
    }
}
