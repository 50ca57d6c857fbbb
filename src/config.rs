//! Runtime configuration for the orchestrator.
//!
//! Mirrors the shape of the commands it configures: retry policy and state
//! TTL for the generation engine, the store location, worker count, and the
//! event-bus sink set. Values resolve from the environment (via dotenvy) with
//! working defaults, so a bare `OrchestratorConfig::default()` runs.

use std::sync::Arc;
use std::time::Duration;

use crate::event_bus::{EventBus, MemorySink, StdOutSink};
use crate::generation::{DEFAULT_MAX_ATTEMPTS, GenerationEngine};
use crate::generator::ContentGenerator;
use crate::publisher::ProgressPublisher;
use crate::router::{Delivery, MessageRouter, WorkerPool};
use crate::store::{DEFAULT_TTL, InMemoryStateStore, StateStore, StoreError, WorkflowStore};

/// Which durable store backs workflow state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    #[cfg(feature = "sqlite")]
    Sqlite,
}

/// Event-bus sink selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self {
            sinks: vec![SinkConfig::StdOut],
        }
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self {
            sinks: vec![SinkConfig::StdOut, SinkConfig::Memory],
        }
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub store_backend: StoreBackend,
    /// SQLite connection URL; resolved from `QUESTLOOM_SQLITE_URL`, falling
    /// back to a `SQLITE_DB_NAME`-derived file URL.
    pub sqlite_url: Option<String>,
    pub state_ttl: Duration,
    pub max_attempts: u32,
    pub worker_count: usize,
    pub event_bus: EventBusConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::InMemory,
            sqlite_url: Self::resolve_sqlite_url(None),
            state_ttl: DEFAULT_TTL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            worker_count: 4,
            event_bus: EventBusConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    fn resolve_sqlite_url(provided: Option<String>) -> Option<String> {
        if provided.is_some() {
            return provided;
        }
        dotenvy::dotenv().ok();
        if let Ok(url) = std::env::var("QUESTLOOM_SQLITE_URL") {
            return Some(url);
        }
        let name =
            std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "questloom.db".to_string());
        Some(format!("sqlite://{name}?mode=rwc"))
    }

    #[must_use]
    pub fn with_sqlite_url(mut self, url: impl Into<String>) -> Self {
        self.sqlite_url = Self::resolve_sqlite_url(Some(url.into()));
        self
    }

    #[cfg(feature = "sqlite")]
    #[must_use]
    pub fn with_sqlite_backend(mut self) -> Self {
        self.store_backend = StoreBackend::Sqlite;
        self
    }

    #[must_use]
    pub fn with_state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Build the workflow store this configuration names, with the configured
    /// record TTL.
    pub async fn build_store(&self) -> Result<WorkflowStore, StoreError> {
        let inner: Arc<dyn StateStore> = match self.store_backend {
            StoreBackend::InMemory => Arc::new(InMemoryStateStore::new()),
            #[cfg(feature = "sqlite")]
            StoreBackend::Sqlite => {
                let url = self.sqlite_url.as_deref().ok_or_else(|| StoreError::Backend {
                    message: "sqlite backend selected without a connection url".to_string(),
                })?;
                Arc::new(crate::store::SqliteStateStore::connect(url).await?)
            }
        };
        Ok(WorkflowStore::with_ttl(inner, self.state_ttl))
    }

    /// Build the event bus with the configured sinks registered. The caller
    /// still owns starting it.
    #[must_use]
    pub fn build_event_bus(&self) -> EventBus {
        let bus = EventBus::new();
        for sink in &self.event_bus.sinks {
            match sink {
                SinkConfig::StdOut => bus.add_sink(StdOutSink::new()),
                SinkConfig::Memory => bus.add_sink(MemorySink::new()),
            }
        }
        bus
    }

    /// Build a generation engine with the configured retry budget.
    #[must_use]
    pub fn build_generation_engine(
        &self,
        store: WorkflowStore,
        generator: Arc<dyn ContentGenerator>,
        publisher: ProgressPublisher,
    ) -> GenerationEngine {
        GenerationEngine::new(store, generator, publisher).with_max_attempts(self.max_attempts)
    }

    /// Spawn the configured number of router workers on `deliveries`.
    #[must_use]
    pub fn spawn_workers(
        &self,
        router: &Arc<MessageRouter>,
        deliveries: flume::Receiver<Delivery>,
    ) -> WorkerPool {
        router.spawn_workers(deliveries, self.worker_count)
    }
}
