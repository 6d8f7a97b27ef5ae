use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use torque_events::{EventBus, Subscription, TopicFilter, Topical};

use crate::command_dispatcher::DispatchError;
use crate::config::RelayRetry;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(worker = self.name, "relay worker panicked");
            }
        }
    }
}

/// Generic relay consumer loop.
///
/// - Subscribes to the relay before returning, so nothing published after
///   `spawn` is missed
/// - Skips messages whose topic is not in `filter`
/// - Retries a handler that reports NotFound (target not materialized yet)
///   up to `retry.attempts` times, then drops the message
/// - Logs and drops every other handler error (at-most-once)
#[derive(Debug)]
pub struct RelayWorker;

impl RelayWorker {
    pub fn spawn<M, B, H>(
        name: &'static str,
        bus: &B,
        filter: TopicFilter,
        retry: RelayRetry,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: Topical + Send + 'static,
        B: EventBus<M>,
        H: FnMut(&M) -> Result<(), DispatchError> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &filter, retry, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    filter: &TopicFilter,
    retry: RelayRetry,
    handler: &mut H,
) where
    M: Topical,
    H: FnMut(&M) -> Result<(), DispatchError>,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if !filter.matches(msg.topic()) {
                    continue;
                }
                deliver(name, &msg, retry, handler);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "relay worker stopped");
}

fn deliver<M, H>(name: &'static str, msg: &M, retry: RelayRetry, handler: &mut H)
where
    M: Topical,
    H: FnMut(&M) -> Result<(), DispatchError>,
{
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        match handler(msg) {
            Ok(()) => return,
            Err(err) if err.is_not_found() && attempt < attempts => {
                debug!(
                    worker = name,
                    topic = msg.topic(),
                    attempt,
                    "relay target not materialized yet; retrying"
                );
                thread::sleep(retry.delay(attempt));
            }
            Err(err) => {
                warn!(
                    worker = name,
                    topic = msg.topic(),
                    attempt,
                    error = %err,
                    "relay handler failed; message dropped"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use torque_core::DomainError;
    use torque_events::InMemoryEventBus;

    #[derive(Debug, Clone)]
    struct Msg(&'static str);

    impl Topical for Msg {
        fn topic(&self) -> &str {
            self.0
        }
    }

    fn quick_retry(attempts: u32) -> RelayRetry {
        RelayRetry {
            attempts,
            backoff_ms: 1,
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn delivers_only_matching_topics() {
        let bus: InMemoryEventBus<Msg> = InMemoryEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = RelayWorker::spawn(
            "test-filter",
            &bus,
            TopicFilter::new(["order.*"]),
            quick_retry(1),
            move |m: &Msg| {
                sink.lock().unwrap().push(m.0);
                Ok(())
            },
        )
        .unwrap();

        bus.publish(Msg("appointment.created")).unwrap();
        bus.publish(Msg("order.created")).unwrap();
        wait_for(|| seen.lock().unwrap().len() == 1);
        worker.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec!["order.created"]);
    }

    #[test]
    fn not_found_is_retried_until_attempts_run_out() {
        let bus: InMemoryEventBus<Msg> = InMemoryEventBus::new();
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let worker = RelayWorker::spawn("test-retry", &bus, TopicFilter::all(), quick_retry(3), move |_: &Msg| {
            *counter.lock().unwrap() += 1;
            Err(DispatchError::Domain(DomainError::not_found()))
        })
        .unwrap();

        bus.publish(Msg("order.ready_for_billing")).unwrap();
        wait_for(|| *calls.lock().unwrap() == 3);
        thread::sleep(Duration::from_millis(20));
        worker.shutdown();

        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[test]
    fn other_errors_are_dropped_without_retry() {
        let bus: InMemoryEventBus<Msg> = InMemoryEventBus::new();
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let worker = RelayWorker::spawn("test-drop", &bus, TopicFilter::all(), quick_retry(5), move |m: &Msg| {
            *counter.lock().unwrap() += 1;
            if m.0 == "order.bad" {
                Err(DispatchError::Domain(DomainError::validation("bad payload")))
            } else {
                Ok(())
            }
        })
        .unwrap();

        bus.publish(Msg("order.bad")).unwrap();
        bus.publish(Msg("order.good")).unwrap();
        wait_for(|| *calls.lock().unwrap() == 2);
        thread::sleep(Duration::from_millis(20));
        worker.shutdown();

        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
