//! The staged indexing pipeline.
//!
//! A single-task cooperative state machine driving fetch → extract → link →
//! detect → summarize, with progress broadcast over a tokio channel and
//! pause/resume/cancel as polled state. Cancellation takes effect between
//! items, between batches, and at phase boundaries; it never truncates an
//! in-flight write.
//!
//! Collaborator failures inside the item loop are per-item skips; the run
//! only fails when an error escapes a phase boundary. Store-level errors
//! always propagate.

use crate::community::{CommunitySummarizer, LouvainConfig, LouvainDetector};
use crate::config::IndexingConfig;
use crate::embedding::SharedEmbedder;
use crate::extract::{Extractor, ExtractionResult, LlmExtractor, dedup_entities};
use crate::linking::LinkPredictor;
use crate::llm::LlmProvider;
use crate::models::{
    DataFamily, EntityType, IndexingPhase, IndexingProgress, IndexingStatus, Relationship,
    SourceItem, entity_id,
};
use crate::platform::{ForegroundNotifier, NoopNotifier, PersonalDataProvider};
use crate::storage::GraphStore;
use crate::{Error, Result, current_timestamp_ms};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::instrument;

/// Poll interval of the cooperative pause loop.
const PAUSE_POLL: Duration = Duration::from_millis(50);

struct PipelineState {
    status: Mutex<IndexingStatus>,
    progress: Mutex<IndexingProgress>,
    cancel: AtomicBool,
    running: AtomicBool,
    last_run_ms: AtomicI64,
    sender: broadcast::Sender<IndexingProgress>,
}

/// End-to-end indexing orchestrator.
///
/// One pipeline per store; the host spawns [`Self::run`] on a background
/// task and watches [`Self::subscribe`] or polls [`Self::snapshot`].
pub struct IndexingPipeline {
    store: Arc<GraphStore>,
    data: Arc<dyn PersonalDataProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
    embedder: Option<SharedEmbedder>,
    notifier: Arc<dyn ForegroundNotifier>,
    config: IndexingConfig,
    state: Arc<PipelineState>,
}

impl IndexingPipeline {
    /// Creates a pipeline without LLM, embedder, or notifier.
    #[must_use]
    pub fn new(
        store: Arc<GraphStore>,
        data: Arc<dyn PersonalDataProvider>,
        config: IndexingConfig,
    ) -> Self {
        let (sender, _receiver) = broadcast::channel(64);
        Self {
            store,
            data,
            llm: None,
            embedder: None,
            notifier: Arc::new(NoopNotifier),
            config,
            state: Arc::new(PipelineState {
                status: Mutex::new(IndexingStatus::Idle),
                progress: Mutex::new(IndexingProgress::idle()),
                cancel: AtomicBool::new(false),
                running: AtomicBool::new(false),
                last_run_ms: AtomicI64::new(0),
                sender,
            }),
        }
    }

    /// Attaches the LLM used for free-text extraction and summaries.
    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attaches the embedder for entity and summary vectors.
    #[must_use]
    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attaches a foreground notifier; all its calls are best-effort.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn ForegroundNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // ========================================================================
    // Control surface
    // ========================================================================

    /// The current lifecycle status.
    #[must_use]
    pub fn status(&self) -> IndexingStatus {
        self.state
            .status
            .lock()
            .map_or(IndexingStatus::Failed, |guard| *guard)
    }

    /// The most recent progress snapshot.
    #[must_use]
    pub fn snapshot(&self) -> IndexingProgress {
        self.state
            .progress
            .lock()
            .map_or_else(|_| IndexingProgress::idle(), |guard| guard.clone())
    }

    /// Subscribes to progress events. Slow subscribers may miss
    /// intermediate states but always observe the terminal one via
    /// [`Self::snapshot`] and the final send.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IndexingProgress> {
        self.state.sender.subscribe()
    }

    /// Requests a cooperative pause; takes effect at the next poll point.
    pub fn pause(&self) {
        if let Ok(mut status) = self.state.status.lock() {
            if *status == IndexingStatus::Running {
                *status = IndexingStatus::Paused;
            }
        }
        self.publish_status();
    }

    /// Resumes a paused run.
    pub fn resume(&self) {
        if let Ok(mut status) = self.state.status.lock() {
            if *status == IndexingStatus::Paused {
                *status = IndexingStatus::Running;
            }
        }
        self.publish_status();
    }

    /// Requests cancellation; the run ends after the current unit of work.
    pub fn cancel(&self) {
        self.state.cancel.store(true, Ordering::SeqCst);
    }

    /// Runs the pipeline to a terminal state.
    ///
    /// `full_reindex` refetches everything; otherwise the previous run's
    /// start time bounds the fetch when incremental indexing is on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when a run is already active. All other
    /// failures surface through the returned terminal status and the
    /// progress stream, not as `Err`.
    #[instrument(skip(self))]
    pub async fn run(&self, full_reindex: bool) -> Result<IndexingStatus> {
        if self
            .state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }

        let run_start = current_timestamp_ms();
        self.state.cancel.store(false, Ordering::SeqCst);
        self.set_status(IndexingStatus::Running);
        self.update_progress(|p| {
            *p = IndexingProgress::idle();
            p.status = IndexingStatus::Running;
            p.start_time = run_start;
        });
        self.notifier.start();

        let outcome = self.execute(full_reindex).await;

        let terminal = match outcome {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(error = %err, "indexing run failed");
                self.update_progress(|p| p.error = Some(err.to_string()));
                IndexingStatus::Failed
            },
        };

        if terminal == IndexingStatus::Completed {
            self.state.last_run_ms.store(run_start, Ordering::SeqCst);
        }

        self.set_status(terminal);
        self.update_progress(|p| {
            p.status = terminal;
            p.end_time = Some(current_timestamp_ms());
        });
        self.publish();
        self.notifier.stop();
        self.state.running.store(false, Ordering::SeqCst);

        metrics::counter!("indexing_runs_total", "terminal" => terminal.to_string()).increment(1);
        Ok(terminal)
    }

    /// Spawns the periodic re-trigger when `reindex_interval` is set.
    ///
    /// Each tick attempts an incremental run and silently skips while a
    /// run is active. Abort the returned handle to stop the schedule.
    #[must_use]
    pub fn spawn_periodic(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.config.reindex_interval?;
        let pipeline = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match pipeline.run(false).await {
                    Ok(status) => {
                        tracing::debug!(%status, "periodic reindex finished");
                    },
                    Err(Error::Busy) => {
                        tracing::debug!("periodic reindex skipped, run active");
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "periodic reindex failed to start");
                    },
                }
            }
        }))
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn execute(&self, full_reindex: bool) -> Result<IndexingStatus> {
        let predictor = LinkPredictor::new(
            Arc::clone(&self.store),
            self.config.link_prediction.clone(),
        );

        // Phase 0: bootstrap.
        self.set_phase(IndexingPhase::Bootstrap);
        predictor.ensure_self_entity(self.embedder.as_ref())?;

        // Phase 1-3: fetch, extract, per-item linking.
        self.set_phase(IndexingPhase::Processing);
        let items = self.fetch_items(full_reindex);
        self.update_progress(|p| p.total_items = items.len());
        self.publish();

        let extractor = self.llm.as_ref().map_or_else(Extractor::direct_only, |llm| {
            Extractor::with_llm(LlmExtractor::new(Arc::clone(llm)))
        });

        let mut accumulated: Vec<ExtractionResult> = Vec::new();
        let mut timestamped: Vec<(String, i64)> = Vec::new();

        for batch in items.chunks(self.config.batch_size.max(1)) {
            if self.wait_if_paused().await == IndexingStatus::Cancelled {
                return Ok(IndexingStatus::Cancelled);
            }

            for item in batch {
                if self.state.cancel.load(Ordering::SeqCst) {
                    return Ok(IndexingStatus::Cancelled);
                }
                match self.process_item(&extractor, &predictor, item) {
                    Ok(Some(extraction)) => {
                        if let (Some(primary), Some(ts)) =
                            (extraction.primary_entity(), item.event_time())
                        {
                            timestamped.push((primary.derived_id(), ts));
                        }
                        accumulated.push(extraction);
                    },
                    Ok(None) => {},
                    Err(err) => return Err(err),
                }
                self.update_progress(|p| p.processed_items += 1);
            }

            self.publish();
            self.notify_progress();
            tokio::time::sleep(self.config.batch_delay).await;
        }

        // Phase 4: batch link prediction.
        if self.config.enable_link_prediction {
            if self.wait_if_paused().await == IndexingStatus::Cancelled {
                return Ok(IndexingStatus::Cancelled);
            }
            self.set_phase(IndexingPhase::LinkPrediction);

            let mut links: Vec<Relationship> = Vec::new();
            if self.config.link_prediction.enable_co_mentions {
                links.extend(predictor.infer_co_mentions(&accumulated));
            }
            if self.config.link_prediction.enable_temporal {
                links.extend(predictor.infer_temporal(&timestamped));
            }
            if self.config.link_prediction.enable_colleagues {
                links.extend(predictor.infer_colleagues()?);
            }
            let stored = predictor.store_links(&links)?;
            self.update_progress(|p| p.predicted_links += stored);
            self.publish();
        }

        // Phase 5: community detection.
        if self.config.detect_communities {
            if self.wait_if_paused().await == IndexingStatus::Cancelled {
                return Ok(IndexingStatus::Cancelled);
            }
            self.set_phase(IndexingPhase::CommunityDetection);
            self.detect_communities()?;
            self.publish();
        }

        // Phase 6: summarization.
        if self.config.generate_summaries {
            if self.wait_if_paused().await == IndexingStatus::Cancelled {
                return Ok(IndexingStatus::Cancelled);
            }
            self.set_phase(IndexingPhase::Summarization);
            if let (Some(llm), Some(embedder)) = (&self.llm, &self.embedder) {
                let summarizer = CommunitySummarizer::new(
                    Arc::clone(&self.store),
                    Arc::clone(llm),
                    embedder.clone(),
                );
                summarizer.summarize_all(&self.state.cancel)?;
            }
            self.publish();
        }

        if self.state.cancel.load(Ordering::SeqCst) {
            return Ok(IndexingStatus::Cancelled);
        }
        Ok(IndexingStatus::Completed)
    }

    /// Fetches new items for every permitted family. Permission denial and
    /// platform errors read as empty fetches.
    fn fetch_items(&self, full_reindex: bool) -> Vec<SourceItem> {
        let since = if full_reindex || !self.config.incremental_indexing {
            None
        } else {
            match self.state.last_run_ms.load(Ordering::SeqCst) {
                0 => None,
                ts => Some(ts),
            }
        };

        let mut items = Vec::new();
        for &family in DataFamily::all() {
            if !self.data.check_permission(family) && !self.data.request_permission(family) {
                tracing::info!(%family, "permission denied, skipping family");
                continue;
            }
            match self.data.fetch_since(family, since, None) {
                Ok(fetched) => items.extend(fetched),
                Err(err) => {
                    tracing::warn!(%family, error = %err, "fetch failed, skipping family");
                },
            }
        }
        items
    }

    /// Extracts one item and writes its entities, relationships, self
    /// link, and template links. Collaborator failures skip the item.
    fn process_item(
        &self,
        extractor: &Extractor,
        predictor: &LinkPredictor,
        item: &SourceItem,
    ) -> Result<Option<ExtractionResult>> {
        let mut extraction = match extractor.extract(item) {
            Ok(extraction) => extraction,
            Err(Error::Collaborator(cause)) => {
                tracing::warn!(source_id = item.source_id(), %cause, "item skipped");
                return Ok(None);
            },
            Err(other) => return Err(other),
        };
        extraction.entities = dedup_entities(std::mem::take(&mut extraction.entities));

        // Entities before relationships, always.
        let item_ts = item.last_modified();
        let mut name_to_id: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        let mut written = 0usize;
        for extracted in extraction.entities.clone() {
            let mut entity = extracted.into_entity(item_ts);
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&entity.embedding_text()) {
                    Ok(vector) => entity.embedding = Some(vector),
                    Err(err) => {
                        tracing::warn!(entity_id = %entity.id, error = %err,
                            "embedding failed, storing without vector");
                    },
                }
            }
            name_to_id.insert(entity.name.to_lowercase(), entity.id.clone());
            if self.store.add_entity_if_newer(&entity)? {
                written += 1;
            }
        }
        self.update_progress(|p| p.extracted_entities += written);

        let mut rel_written = 0usize;
        for rel in &extraction.relationships {
            let Some(source_id) = self.resolve_endpoint(&rel.source_name, &name_to_id)? else {
                continue;
            };
            let Some(target_id) = self.resolve_endpoint(&rel.target_name, &name_to_id)? else {
                continue;
            };
            let link = Relationship::new(source_id, rel.rel_type.clone(), target_id)
                .with_weight(rel.confidence);
            if predictor.store_link(&link)? {
                rel_written += 1;
            }
        }

        // Self link plus per-item template inference.
        if self.config.enable_link_prediction && self.config.link_prediction.enable_self_links {
            if let Some(primary) = extraction.primary_entity() {
                predictor.link_self(item.family(), &primary.derived_id())?;
            }
        }
        if self.config.enable_link_prediction && self.config.link_prediction.enable_templates {
            let template_links = predictor.infer_templates(&extraction);
            rel_written += predictor.store_links(&template_links)?;
        }
        self.update_progress(|p| p.extracted_relationships += rel_written);

        Ok(Some(extraction))
    }

    /// Maps a relationship endpoint name to an entity id: the in-item name
    /// map first, then a bounded scan across known type prefixes against
    /// the store. Unresolvable endpoints skip the relationship.
    fn resolve_endpoint(
        &self,
        name: &str,
        name_to_id: &std::collections::HashMap<String, String>,
    ) -> Result<Option<String>> {
        if let Some(id) = name_to_id.get(&name.to_lowercase()) {
            return Ok(Some(id.clone()));
        }
        for &entity_type in EntityType::all() {
            let candidate = entity_id(entity_type, name);
            if self.store.get_entity(&candidate)?.is_some() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn detect_communities(&self) -> Result<()> {
        let entities = self.store.list_entities()?;
        let relationships = self.store.list_relationships()?;

        let detector = LouvainDetector::new(
            LouvainConfig::new().with_max_depth(self.config.max_community_depth),
        );
        let detection = detector.detect(&entities, &relationships);

        let mut persisted = 0usize;
        for mut community in detection.communities {
            // Members may have raced a delete since the load; persist only
            // ids the store still resolves.
            let mut existing = Vec::with_capacity(community.member_ids.len());
            for id in community.member_ids {
                if self.store.get_entity(&id)?.is_some() {
                    existing.push(id);
                }
            }
            if existing.is_empty() {
                continue;
            }
            community.member_ids = existing;
            self.store.add_community(&community)?;
            persisted += 1;
        }

        self.update_progress(|p| p.detected_communities += persisted);
        tracing::info!(
            communities = persisted,
            modularity = detection.overall_modularity,
            depth = detection.hierarchy_depth,
            "community detection finished"
        );
        Ok(())
    }

    // ========================================================================
    // State plumbing
    // ========================================================================

    /// Polls the pause state until running or cancelled.
    async fn wait_if_paused(&self) -> IndexingStatus {
        loop {
            if self.state.cancel.load(Ordering::SeqCst) {
                return IndexingStatus::Cancelled;
            }
            if self.status() != IndexingStatus::Paused {
                return IndexingStatus::Running;
            }
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }

    fn set_status(&self, status: IndexingStatus) {
        if let Ok(mut guard) = self.state.status.lock() {
            *guard = status;
        }
    }

    fn set_phase(&self, phase: IndexingPhase) {
        self.update_progress(|p| p.phase = Some(phase));
        self.publish();
        tracing::info!(phase = phase.as_str(), "entering phase");
    }

    fn update_progress(&self, mutate: impl FnOnce(&mut IndexingProgress)) {
        if let Ok(mut guard) = self.state.progress.lock() {
            mutate(&mut guard);
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        let _ = self.state.sender.send(snapshot);
    }

    fn publish_status(&self) {
        let status = self.status();
        self.update_progress(|p| p.status = status);
        self.publish();
    }

    /// Foreground notifier update; errors are the notifier's problem.
    fn notify_progress(&self) {
        let snapshot = self.snapshot();
        self.notifier.update(
            snapshot.progress(),
            snapshot.phase.map_or("", |phase| phase.as_str()),
            snapshot.extracted_entities,
            snapshot.extracted_relationships,
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedder;
    use crate::llm::testing::ScriptedLlm;
    use crate::models::{CalendarEvent, Contact};
    use crate::platform::testing::FixtureDataProvider;

    fn contact(id: &str, name: &str, org: Option<&str>) -> SourceItem {
        SourceItem::Contact(Contact {
            id: id.to_string(),
            full_name: name.to_string(),
            organization_name: org.map(String::from),
            last_modified: 1_000,
            ..Contact::default()
        })
    }

    fn pipeline_with(items: Vec<(DataFamily, Vec<SourceItem>)>) -> (Arc<GraphStore>, IndexingPipeline) {
        let store = Arc::new(GraphStore::in_memory().unwrap());
        let mut provider = FixtureDataProvider::new();
        for (family, family_items) in items {
            provider = provider.with_items(family, family_items);
        }
        let config = IndexingConfig::new()
            .with_batch_delay(Duration::from_millis(1))
            .with_summaries(false);
        let pipeline = IndexingPipeline::new(Arc::clone(&store), Arc::new(provider), config)
            .with_embedder(SharedEmbedder::new(Box::new(HashEmbedder::new(8))));
        (store, pipeline)
    }

    #[tokio::test]
    async fn test_contact_indexing_end_to_end() {
        let (store, pipeline) = pipeline_with(vec![(
            DataFamily::Contacts,
            vec![contact("c1", "Ada Lovelace", Some("Analytical Engine Co"))],
        )]);

        let terminal = pipeline.run(true).await.unwrap();
        assert_eq!(terminal, IndexingStatus::Completed);

        let ada = store.get_entity("person_ada_lovelace").unwrap().unwrap();
        assert_eq!(ada.name, "Ada Lovelace");
        assert!(ada.embedding.is_some());
        assert!(store
            .get_entity("organization_analytical_engine_co")
            .unwrap()
            .is_some());

        let rels = store.relationships_for("person_ada_lovelace").unwrap();
        assert!(rels.iter().any(|r| {
            r.rel_type == crate::models::RelationshipType::WorksAt
                && r.target_id == "organization_analytical_engine_co"
        }));
        // Self link.
        assert!(rels.iter().any(|r| {
            r.source_id == crate::models::SELF_ENTITY_ID
                && r.rel_type == crate::models::RelationshipType::Knows
        }));
    }

    #[tokio::test]
    async fn test_run_refuses_while_active() {
        let (_store, pipeline) = pipeline_with(vec![]);
        let pipeline = Arc::new(pipeline);

        // Simulate an active run by holding the flag.
        pipeline.state.running.store(true, Ordering::SeqCst);
        assert!(matches!(pipeline.run(false).await, Err(Error::Busy)));
        pipeline.state.running.store(false, Ordering::SeqCst);
        assert!(pipeline.run(false).await.is_ok());
    }

    #[tokio::test]
    async fn test_progress_reaches_terminal_state() {
        let (_store, pipeline) = pipeline_with(vec![(
            DataFamily::Contacts,
            vec![contact("c1", "Ada", None), contact("c2", "Bob", None)],
        )]);

        let mut receiver = pipeline.subscribe();
        pipeline.run(true).await.unwrap();

        let mut saw_terminal = false;
        while let Ok(progress) = receiver.try_recv() {
            assert!(progress.processed_items <= progress.total_items);
            if progress.status.is_terminal() {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal);
        assert_eq!(pipeline.snapshot().processed_items, 2);
        assert!(pipeline.snapshot().end_time.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_before_run_keeps_phase1_writes() {
        let (store, pipeline) = pipeline_with(vec![(
            DataFamily::Contacts,
            vec![contact("c1", "Ada", None)],
        )]);

        // Cancel mid-run: request cancellation after the first batch by
        // cancelling up front; bootstrap and fetch still run, the item
        // loop observes the flag before the first item.
        pipeline.cancel();
        // run() resets the flag, so request again right after start via a
        // paused state instead: simplest deterministic check is cancel
        // during pause.
        let pipeline = Arc::new(pipeline);
        let runner = {
            let p = Arc::clone(&pipeline);
            tokio::spawn(async move { p.run(true).await })
        };
        pipeline.pause();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.cancel();
        let terminal = runner.await.unwrap().unwrap();

        // Either the run finished before pause took effect, or it was
        // cancelled cleanly; in both cases nothing is half-written.
        assert!(matches!(
            terminal,
            IndexingStatus::Completed | IndexingStatus::Cancelled
        ));
        if terminal == IndexingStatus::Cancelled {
            assert_eq!(pipeline.status(), IndexingStatus::Cancelled);
        }
        // The Self node from bootstrap is intact either way.
        assert!(store.get_entity(crate::models::SELF_ENTITY_ID).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incremental_skips_unchanged_data() {
        let (store, pipeline) = pipeline_with(vec![(
            DataFamily::Contacts,
            vec![contact("c1", "Ada", None)],
        )]);

        pipeline.run(true).await.unwrap();
        let first = store.stats().unwrap();

        // No new data: the incremental run fetches nothing newer.
        pipeline.run(false).await.unwrap();
        let second = store.stats().unwrap();
        assert_eq!(first.entity_count, second.entity_count);
        assert_eq!(first.relationship_count, second.relationship_count);
        assert_eq!(pipeline.snapshot().total_items, 0);
    }

    #[tokio::test]
    async fn test_event_attendees_and_colleague_free_flow() {
        let (store, pipeline) = pipeline_with(vec![(
            DataFamily::Calendar,
            vec![SourceItem::Calendar(CalendarEvent {
                id: "e1".to_string(),
                title: "Project Kickoff".to_string(),
                location: Some("Room 42".to_string()),
                attendees: vec!["Ada".to_string(), "Bob".to_string()],
                last_modified: 1_000,
                ..CalendarEvent::default()
            })],
        )]);

        pipeline.run(true).await.unwrap();

        for id in [
            "event_project_kickoff",
            "location_room_42",
            "person_ada",
            "person_bob",
        ] {
            assert!(store.get_entity(id).unwrap().is_some(), "missing {id}");
        }
        let event_rels = store.relationships_for("event_project_kickoff").unwrap();
        assert!(event_rels.iter().any(|r| {
            r.rel_type == crate::models::RelationshipType::LocatedIn
                && r.target_id == "location_room_42"
        }));
        assert!(event_rels.iter().any(|r| {
            r.rel_type == crate::models::RelationshipType::AttendedBy
                && r.source_id == "person_ada"
        }));
    }

    #[tokio::test]
    async fn test_summarization_with_mock_llm() {
        let store = Arc::new(GraphStore::in_memory().unwrap());
        let provider = FixtureDataProvider::new().with_items(
            DataFamily::Contacts,
            vec![
                contact("c1", "Ada", Some("Acme")),
                contact("c2", "Bob", Some("Acme")),
            ],
        );
        let llm = ScriptedLlm::new(vec!["a community summary"]);
        let config = IndexingConfig::new().with_batch_delay(Duration::from_millis(1));
        let pipeline = IndexingPipeline::new(Arc::clone(&store), Arc::new(provider), config)
            .with_embedder(SharedEmbedder::new(Box::new(HashEmbedder::new(8))))
            .with_llm(Arc::new(llm));

        pipeline.run(true).await.unwrap();

        let stats = store.stats().unwrap();
        assert!(stats.community_count > 0);
        let summarized = store
            .communities_at_level(0)
            .unwrap()
            .iter()
            .any(|c| !c.summary.is_empty());
        assert!(summarized);
    }
}
