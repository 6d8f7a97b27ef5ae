//! Event relay abstraction (publish/subscribe mechanics only).
//!
//! The relay is the delivery substrate between the stores. It is not a
//! business owner and makes minimal promises:
//!
//! - **At-most-once**: a publish that fails is dropped by the caller, never
//!   retried; a message may also be lost if a subscriber is gone.
//! - **No deduplication**: a message can be seen more than once if it was
//!   published more than once; consumers that create entities are idempotent.
//! - **No ordering** relative to synchronous calls: a consumer can receive an
//!   event before or after a client has already acted on the same entity.
//! - **No persistence**: the aggregate streams are the source of truth.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to the relay.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). Subscriptions are consumed by one thread.
///
/// ```ignore
/// let subscription = relay.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(envelope) => handle(envelope),
///         Err(RecvTimeoutError::Timeout) => continue,      // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,    // relay dropped
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Topic-based publish/subscribe bus.
///
/// ```text
/// Store command → Event Store (append) → EventBus (publish) → subscribers
///                                                              ├─ Order Store handler
///                                                              └─ Invoice Store handler
/// ```
///
/// `publish()` can fail (relay unreachable, lock poisoned). Callers treat that
/// as a dropped side effect: the local transition has already committed and is
/// never rolled back because of it.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
