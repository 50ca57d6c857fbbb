use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::oneshot, task};

use super::emitter::{EmitterError, EventEmitter};
use super::event::OutboundEvent;
use super::sink::{EventSink, StdOutSink};

/// Which topics a sink registration receives.
///
/// Topics are the `user:{user_id}:{segment}` / `system:{segment}` strings from
/// [`OutboundEvent::topic`]; a prefix filter is how a per-user consumer (a
/// websocket session, an SSE stream) taps only its own traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicFilter {
    /// Every event, regardless of topic.
    All,
    /// Topics starting with the given prefix.
    Prefix(String),
}

impl TopicFilter {
    /// Filter matching every topic belonging to one user.
    #[must_use]
    pub fn user(user_id: impl AsRef<str>) -> Self {
        Self::Prefix(format!("user:{}:", user_id.as_ref()))
    }

    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => topic.starts_with(prefix),
        }
    }
}

struct Registration {
    filter: TopicFilter,
    sink: Box<dyn EventSink>,
}

/// Fans emitted events out to registered sinks, per topic.
///
/// Engines publish through cloneable [`BusEmitter`] handles; a single
/// background task drains the channel and hands each event to every
/// registration whose [`TopicFilter`] matches the event's topic. Sinks can be
/// registered before or after [`start`](Self::start), so a per-user stream can
/// attach mid-flight.
pub struct EventBus {
    registrations: Arc<Mutex<Vec<Registration>>>,
    sender: flume::Sender<OutboundEvent>,
    receiver: flume::Receiver<OutboundEvent>,
    listener: Mutex<Option<Listener>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// A bus with no sinks yet; events are dropped until one is registered.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            registrations: Arc::new(Mutex::new(Vec::new())),
            sender,
            receiver,
            listener: Mutex::new(None),
        }
    }

    /// A bus with one unfiltered sink.
    pub fn with_sink<T: EventSink + 'static>(sink: T) -> Self {
        let bus = Self::new();
        bus.add_sink(sink);
        bus
    }

    /// Register an unfiltered sink.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.subscribe(TopicFilter::All, sink);
    }

    /// Register a sink for the topics `filter` matches.
    pub fn subscribe<T: EventSink + 'static>(&self, filter: TopicFilter, sink: T) {
        self.registrations.lock().push(Registration {
            filter,
            sink: Box::new(sink),
        });
    }

    /// A cloneable emitter handle for producers.
    #[must_use]
    pub fn emitter(&self) -> BusEmitter {
        BusEmitter {
            sender: self.sender.clone(),
        }
    }

    /// Spawn the background fan-out task. Idempotent; a second call is a
    /// no-op.
    pub fn start(&self) {
        let mut guard = self.listener.lock();
        if guard.is_some() {
            return;
        }

        let receiver = self.receiver.clone();
        let registrations = self.registrations.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(e) => {
                            tracing::warn!(error = %e, "event bus channel closed");
                            break;
                        }
                        Ok(event) => {
                            let topic = event.topic();
                            let mut registrations = registrations.lock();
                            for registration in registrations.iter_mut() {
                                if !registration.filter.matches(&topic) {
                                    continue;
                                }
                                if let Err(e) = registration.sink.handle(&event) {
                                    tracing::warn!(error = %e, topic = %topic, "event sink error");
                                }
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(Listener {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the fan-out task, waiting for the in-flight event to finish.
    pub async fn shutdown(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.shutdown_tx.send(());
            let _ = listener.handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            let _ = listener.shutdown_tx.send(());
            listener.handle.abort();
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("registrations", &self.registrations.lock().len())
            .field("listening", &self.listener.lock().is_some())
            .finish()
    }
}

struct Listener {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

/// Cloneable [`EventEmitter`] over the bus channel.
#[derive(Clone)]
pub struct BusEmitter {
    sender: flume::Sender<OutboundEvent>,
}

impl std::fmt::Debug for BusEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusEmitter").finish()
    }
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: OutboundEvent) -> Result<(), EmitterError> {
        self.sender.send(event).map_err(|_| EmitterError::Closed)
    }
}
