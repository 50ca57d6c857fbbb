//! Outbound event fan-out for progress and notification delivery.
//!
//! Engines emit [`OutboundEvent`]s through an [`EventEmitter`]; the
//! [`EventBus`] hands them to every registered [`EventSink`] whose
//! [`TopicFilter`] matches the event's topic. Sinks are the integration point
//! for whatever actually carries events to users (a websocket hub, a pub/sub
//! topic, stdout in dev, memory in tests).

pub mod bus;
pub mod emitter;
pub mod event;
pub mod sink;

pub use bus::{BusEmitter, EventBus, TopicFilter};
pub use emitter::{EmitterError, EventEmitter};
pub use event::{EventKind, OutboundEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
