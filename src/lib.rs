//! # Questloom: Durable Campaign Orchestration
//!
//! Questloom is a message-driven orchestration layer for AI-authored game
//! campaigns: a resumable generation workflow with human approval gates, a
//! mirror-image best-effort deletion workflow with reference-counted world
//! cleanup, and an objective cascade engine that rolls gameplay completions
//! up through the narrative hierarchy.
//!
//! ## Core Concepts
//!
//! - **Commands**: JSON queue messages decoded into typed envelopes
//! - **State**: versioned serde records, reloaded from the store on every
//!   command — nothing waits in memory across an approval gate
//! - **Engines**: generation (explicit phase machine + pure planner),
//!   deletion (ordered best-effort teardown), cascade (monotonic rollup)
//! - **Events**: per-user progress and notification topics over a
//!   sink-fanout event bus
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use questloom::{
//!     event_bus::{EventBus, MemorySink},
//!     generation::GenerationEngine,
//!     publisher::ProgressPublisher,
//!     router::{Delivery, MessageRouter},
//!     store::{InMemoryStateStore, WorkflowStore},
//! };
//!
//! # async fn example(
//! #     generator: Arc<dyn questloom::generator::ContentGenerator>,
//! #     documents: Arc<dyn questloom::deletion::DocumentStore>,
//! #     graph: Arc<dyn questloom::deletion::GraphStore>,
//! # ) {
//! let store = WorkflowStore::new(Arc::new(InMemoryStateStore::new()));
//! let bus = EventBus::with_sink(MemorySink::new());
//! bus.start();
//! let publisher = ProgressPublisher::new(Arc::new(bus.emitter()));
//!
//! let generation = Arc::new(GenerationEngine::new(
//!     store.clone(),
//!     generator,
//!     publisher.clone(),
//! ));
//! let deletion = Arc::new(questloom::deletion::DeletionEngine::new(
//!     store.clone(),
//!     documents,
//!     graph,
//!     None,
//!     publisher.clone(),
//! ));
//!
//! let router = Arc::new(MessageRouter::new(store, generation, deletion, publisher));
//! let (tx, rx) = flume::unbounded::<Delivery>();
//! let workers = router.spawn_workers(rx, 4);
//!
//! tx.send(Delivery::unacked(
//!     br#"{"request_id":"r1","user_id":"u1","workflow_action":"start"}"#.to_vec(),
//! ))
//! .unwrap();
//! # drop(tx);
//! # workers.shutdown().await;
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`command`] - inbound command envelopes and decoding
//! - [`state`] - durable workflow/deletion state and progress projections
//! - [`store`] - state store trait, in-memory and SQLite backends
//! - [`generation`] - the generation engine and transition planner
//! - [`deletion`] - the deletion engine and content-store traits
//! - [`cascade`] - the objective cascade engine
//! - [`router`] - delivery handling, idempotency guard, worker pool
//! - [`event_bus`] / [`publisher`] - outbound events and progress publishing

pub mod cascade;
pub mod command;
pub mod config;
pub mod deletion;
pub mod event_bus;
pub mod generation;
pub mod generator;
pub mod publisher;
pub mod router;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
