//! The campaign deletion workflow engine.
//!
//! Deletion is the mirror image of generation: a strict children-first order
//! over entity categories, then the campaign root across every content store,
//! then reference-counted cleanup of world content the campaign introduced.
//!
//! Deletion is deliberately best-effort. A category or store failure becomes a
//! warning plus an audit entry and the teardown continues; partial deletions
//! are an accepted outcome, surfaced in the final report. The only fatal
//! failure is being unable to persist `DeletionState` itself, since without
//! durable state a resume would have nothing to resume from.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::command::DeletionCommand;
use crate::publisher::ProgressPublisher;
use crate::state::{DeletionState, ErrorEntry};
use crate::store::{StoreError, WorkflowStore};
use crate::types::{DeletionPhase, EntityCategory};

/// Failures from a content store backend.
#[derive(Debug, Error, Diagnostic)]
pub enum ContentStoreError {
    #[error("content store error: {message}")]
    #[diagnostic(code(questloom::deletion::content_store))]
    Backend { message: String },
}

impl ContentStoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Command-level deletion failures. Persistence is the only fatal class.
#[derive(Debug, Error, Diagnostic)]
pub enum DeletionError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("deletion {request_id} is already terminal")]
    #[diagnostic(code(questloom::deletion::already_terminal))]
    AlreadyTerminal { request_id: String },

    #[error("stale command for {request_id}: sequence {got} < last applied {last}")]
    #[diagnostic(
        code(questloom::deletion::stale_command),
        help("A newer command for this deletion was already applied; this one is dropped.")
    )]
    StaleCommand {
        request_id: String,
        got: u64,
        last: u64,
    },
}

/// The primary content store holding campaign entities as documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Delete every entity of `category` belonging to `campaign_id`,
    /// returning the ids that were removed.
    async fn delete_category(
        &self,
        campaign_id: &str,
        category: EntityCategory,
    ) -> Result<Vec<String>, ContentStoreError>;

    /// Delete the campaign root record. `false` when no such record existed.
    async fn delete_campaign_root(&self, campaign_id: &str) -> Result<bool, ContentStoreError>;

    /// Species ids this campaign introduced into the shared world.
    async fn campaign_species(&self, campaign_id: &str) -> Result<Vec<String>, ContentStoreError>;

    /// Location ids this campaign introduced into the shared world.
    async fn campaign_locations(&self, campaign_id: &str)
    -> Result<Vec<String>, ContentStoreError>;

    /// How many campaigns other than `excluding_campaign` still reference the
    /// species.
    async fn species_reference_count(
        &self,
        species_id: &str,
        excluding_campaign: &str,
    ) -> Result<u64, ContentStoreError>;

    /// How many campaigns other than `excluding_campaign` still reference the
    /// location.
    async fn location_reference_count(
        &self,
        location_id: &str,
        excluding_campaign: &str,
    ) -> Result<u64, ContentStoreError>;

    /// Remove a species whose reference count reached zero.
    async fn remove_species(&self, species_id: &str) -> Result<(), ContentStoreError>;

    /// Remove a location whose reference count reached zero.
    async fn remove_location(&self, location_id: &str) -> Result<(), ContentStoreError>;
}

/// The graph store holding campaign relationship data.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Remove the campaign's subgraph, returning how many nodes went away.
    async fn delete_campaign_graph(&self, campaign_id: &str) -> Result<u64, ContentStoreError>;
}

/// The relational store holding campaign rows. Optional in deployments that
/// never project campaigns relationally.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Remove the campaign's rows, returning how many were deleted.
    async fn delete_campaign_rows(&self, campaign_id: &str) -> Result<u64, ContentStoreError>;
}

/// Executes deletion commands against durable state.
pub struct DeletionEngine {
    store: WorkflowStore,
    documents: Arc<dyn DocumentStore>,
    graph: Arc<dyn GraphStore>,
    relational: Option<Arc<dyn RelationalStore>>,
    publisher: ProgressPublisher,
}

impl DeletionEngine {
    pub fn new(
        store: WorkflowStore,
        documents: Arc<dyn DocumentStore>,
        graph: Arc<dyn GraphStore>,
        relational: Option<Arc<dyn RelationalStore>>,
        publisher: ProgressPublisher,
    ) -> Self {
        Self {
            store,
            documents,
            graph,
            relational,
            publisher,
        }
    }

    /// Handle one validated deletion command end to end.
    ///
    /// Re-delivery of the same `request_id` resumes: categories already
    /// recorded as deleted are skipped, store flags already set are not redone.
    #[instrument(
        skip(self, cmd),
        fields(request_id = %cmd.request_id, campaign_id = %cmd.campaign_id)
    )]
    pub async fn handle(&self, cmd: DeletionCommand) -> Result<(), DeletionError> {
        let mut state = match self.store.load_deletion(&cmd.request_id).await? {
            Some(existing) if existing.is_terminal() => {
                return Err(DeletionError::AlreadyTerminal {
                    request_id: cmd.request_id.clone(),
                });
            }
            Some(existing) => existing,
            None => {
                let mut fresh = DeletionState::from_command(&cmd);
                fresh.record_audit("command_accepted", "delete");
                fresh
            }
        };

        // Sequence 0 means the sender does not number commands.
        if cmd.sequence != 0 {
            if cmd.sequence < state.last_sequence {
                return Err(DeletionError::StaleCommand {
                    request_id: cmd.request_id.clone(),
                    got: cmd.sequence,
                    last: state.last_sequence,
                });
            }
            state.last_sequence = cmd.sequence;
        }

        // Capture candidate world content up front; once categories start
        // going away the campaign's own records may no longer be queryable.
        // Which candidates actually go is decided by refcount at cleanup.
        if state.species_introduced.is_empty() && state.locations_introduced.is_empty() {
            match self.documents.campaign_species(&cmd.campaign_id).await {
                Ok(ids) => state.species_introduced = ids,
                Err(e) => state.record_warning(format!("species lookup failed: {e}")),
            }
            match self.documents.campaign_locations(&cmd.campaign_id).await {
                Ok(ids) => state.locations_introduced = ids,
                Err(e) => state.record_warning(format!("location lookup failed: {e}")),
            }
        }
        self.checkpoint(&mut state).await?;

        for category in EntityCategory::DELETION_ORDER {
            state.current_phase = DeletionPhase::Category(category);
            if state.deleted.contains_key(category.as_str()) {
                state.record_audit("category_skipped", "already processed");
                continue;
            }
            match self
                .documents
                .delete_category(&cmd.campaign_id, category)
                .await
            {
                Ok(ids) => {
                    info!(category = %category, count = ids.len(), "category deleted");
                    state.record_deleted(category, ids);
                }
                Err(e) => {
                    warn!(category = %category, error = %e, "category deletion failed, continuing");
                    state.record_warning(format!("failed to delete {category}: {e}"));
                    state.record_error(ErrorEntry::new(
                        state.current_phase.encode(),
                        e.to_string(),
                    ));
                    // Mark the category as processed so a resume does not
                    // retry it ahead of its parents.
                    state.record_deleted(category, Vec::new());
                }
            }
            self.checkpoint(&mut state).await?;
        }

        state.current_phase = DeletionPhase::CampaignRoot;
        self.tear_down_root(&mut state).await;
        self.checkpoint(&mut state).await?;

        state.current_phase = DeletionPhase::WorldCleanup;
        self.clean_world_content(&mut state).await;
        self.checkpoint(&mut state).await?;

        state.current_phase = DeletionPhase::Completed;
        state.record_audit("deletion_finished", format!("{} entities", state.deleted_count()));
        self.checkpoint(&mut state).await?;
        Ok(())
    }

    /// Remove the campaign root across document, graph, and relational stores.
    /// Each flag is set only on success; a missing relational backend counts
    /// as vacuously deleted.
    async fn tear_down_root(&self, state: &mut DeletionState) {
        if !state.document_deleted {
            match self
                .documents
                .delete_campaign_root(&state.campaign_id)
                .await
            {
                Ok(existed) => {
                    state.document_deleted = true;
                    if !existed {
                        state.record_warning("campaign root was already absent".to_string());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "document root deletion failed");
                    state.record_warning(format!("document root deletion failed: {e}"));
                    state.record_error(ErrorEntry::new("campaign_root", e.to_string()));
                }
            }
        }

        if !state.graph_deleted {
            match self.graph.delete_campaign_graph(&state.campaign_id).await {
                Ok(nodes) => {
                    state.graph_deleted = true;
                    state.record_audit("graph_deleted", format!("{nodes} nodes"));
                }
                Err(e) => {
                    warn!(error = %e, "graph deletion failed");
                    state.record_warning(format!("graph deletion failed: {e}"));
                    state.record_error(ErrorEntry::new("campaign_root", e.to_string()));
                }
            }
        }

        if !state.relational_deleted {
            match &self.relational {
                Some(relational) => {
                    match relational.delete_campaign_rows(&state.campaign_id).await {
                        Ok(rows) => {
                            state.relational_deleted = true;
                            state.record_audit("relational_deleted", format!("{rows} rows"));
                        }
                        Err(e) => {
                            warn!(error = %e, "relational deletion failed");
                            state.record_warning(format!("relational deletion failed: {e}"));
                            state.record_error(ErrorEntry::new("campaign_root", e.to_string()));
                        }
                    }
                }
                None => {
                    state.relational_deleted = true;
                }
            }
        }
    }

    /// Reference-counted removal of world content the campaign introduced.
    ///
    /// Counts are queried concurrently. A candidate moves into the remove set
    /// only when nothing else references it; shared content is kept with its
    /// remaining count recorded. Candidates already in the remove set were
    /// handled by an earlier delivery and are skipped.
    async fn clean_world_content(&self, state: &mut DeletionState) {
        let campaign_id = state.campaign_id.clone();

        let species: Vec<String> = state
            .species_introduced
            .iter()
            .filter(|id| !state.species_to_remove.contains(id))
            .cloned()
            .collect();
        let counts = join_all(species.iter().map(|id| {
            let documents = self.documents.clone();
            let campaign_id = campaign_id.clone();
            async move {
                documents
                    .species_reference_count(id, &campaign_id)
                    .await
            }
        }))
        .await;
        for (id, count) in species.iter().zip(counts) {
            match count {
                Ok(0) => match self.documents.remove_species(id).await {
                    Ok(()) => {
                        state.species_to_remove.push(id.clone());
                        state.species_dependencies.insert(id.clone(), 0);
                        state.record_audit("species_removed", id.clone());
                    }
                    Err(e) => {
                        state.record_warning(format!("species {id} removal failed: {e}"));
                    }
                },
                Ok(n) => {
                    state.species_dependencies.insert(id.clone(), n);
                    state.record_audit("species_kept", format!("{id}: {n} campaigns still reference it"));
                }
                Err(e) => {
                    state.record_warning(format!("species {id} refcount failed: {e}"));
                }
            }
        }

        let locations: Vec<String> = state
            .locations_introduced
            .iter()
            .filter(|id| !state.locations_to_remove.contains(id))
            .cloned()
            .collect();
        let counts = join_all(locations.iter().map(|id| {
            let documents = self.documents.clone();
            let campaign_id = campaign_id.clone();
            async move {
                documents
                    .location_reference_count(id, &campaign_id)
                    .await
            }
        }))
        .await;
        for (id, count) in locations.iter().zip(counts) {
            match count {
                Ok(0) => match self.documents.remove_location(id).await {
                    Ok(()) => {
                        state.locations_to_remove.push(id.clone());
                        state.location_dependencies.insert(id.clone(), 0);
                        state.record_audit("location_removed", id.clone());
                    }
                    Err(e) => {
                        state.record_warning(format!("location {id} removal failed: {e}"));
                    }
                },
                Ok(n) => {
                    state.location_dependencies.insert(id.clone(), n);
                    state.record_audit("location_kept", format!("{id}: {n} campaigns still reference it"));
                }
                Err(e) => {
                    state.record_warning(format!("location {id} refcount failed: {e}"));
                }
            }
        }
    }

    /// Persist state and stream the resulting progress snapshot.
    async fn checkpoint(&self, state: &mut DeletionState) -> Result<(), DeletionError> {
        let projection = self.store.checkpoint_deletion(state).await?;
        self.publisher.publish_deletion(state, &projection);
        Ok(())
    }
}

impl std::fmt::Debug for DeletionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionEngine")
            .field("has_relational", &self.relational.is_some())
            .finish()
    }
}
