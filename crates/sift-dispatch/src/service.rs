//! The dispatch loop: a single cooperative worker over the work queue.
//!
//! Exactly one work item is `analyzing` at a time system-wide. Concurrency
//! lives one layer down, in the outbound inference path, where the
//! [`ConcurrencyLimiter`] lets one item's sub-requests (quality, dimensions,
//! tags, summary) overlap.
//!
//! The loop parks on the queue's wake handle with a poll-interval fallback,
//! so work enqueued while parked is never missed even if a wake signal is
//! dropped. Every failure is caught at the loop boundary, classified, and
//! converted into item state; nothing propagates out of the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use sift_core::{
    defaults, hash_file, new_v7, AnalysisRecord, AnalysisStore, DerivedViewRefresher, Error,
    ErrorStats, GenerationBackend, IgnoreRules, QueueStats, RemoteAnalysisCache, Result,
    ThumbnailSink, Unit, WorkItem, WorkItemKind, WorkspaceResolver,
};
use sift_inference::{ConcurrencyLimiter, LimiterStats};

use crate::extract::{ContentExtractor, TextExtractor};
use crate::queue::{EnqueueCandidate, QueueManager};
use crate::recovery::{classify_failure, FailureStage, RecoveryManager};
use crate::units::{ChildEntry, UnitDecision, UnitPolicy};

/// Limiter priorities for the loop's inference sub-requests.
const PRIORITY_DIR_CONTEXT: i32 = 6;
const PRIORITY_QUALITY: i32 = 5;
const PRIORITY_DIMENSIONS: i32 = 4;
const PRIORITY_TAGS: i32 = 4;
const PRIORITY_SUMMARY: i32 = 3;

/// Configuration for the dispatch loop.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Safety-net poll interval while parked, in milliseconds.
    pub poll_interval_ms: u64,
    /// Re-analyze paths that already have a persisted analysis.
    pub force_recache: bool,
    /// Whether the loop processes items at all.
    pub enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            force_recache: false,
            enabled: true,
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SIFT_DISPATCH_ENABLED` | `true` | Enable/disable the loop |
    /// | `SIFT_POLL_INTERVAL_MS` | `1000` | Park poll interval |
    /// | `SIFT_FORCE_RECACHE` | `false` | Re-analyze already-analyzed paths |
    pub fn from_env() -> Self {
        let enabled = std::env::var("SIFT_DISPATCH_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("SIFT_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::POLL_INTERVAL_MS);

        let force_recache = std::env::var("SIFT_FORCE_RECACHE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            poll_interval_ms,
            force_recache,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_force_recache(mut self, force: bool) -> Self {
        self.force_recache = force;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Combined statistics surface across the dispatch subsystem.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchStats {
    pub queue: QueueStats,
    pub errors: ErrorStats,
    pub limiter: LimiterStats,
}

/// Handle for controlling a running dispatch service.
pub struct ServiceHandle {
    shutdown_tx: mpsc::Sender<()>,
    service: Arc<AnalysisService>,
}

impl ServiceHandle {
    /// Signal the loop to stop and force-terminate outbound calls, waiting
    /// up to the limiter's drain bound.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.service.limiter.force_terminate_all().await;
        Ok(())
    }

    /// Stop picking up new items. Work already in flight is not interrupted.
    pub fn pause(&self) {
        self.service.paused.store(true, Ordering::SeqCst);
        info!(subsystem = "dispatch", "Dispatch paused");
    }

    /// Resume picking up items.
    pub fn resume(&self) {
        self.service.paused.store(false, Ordering::SeqCst);
        self.service.queue.wake_handle().notify_waiters();
        info!(subsystem = "dispatch", "Dispatch resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.service.paused.load(Ordering::SeqCst)
    }

    /// The underlying service, for statistics queries.
    pub fn service(&self) -> &Arc<AnalysisService> {
        &self.service
    }
}

/// The analysis dispatch service.
pub struct AnalysisService {
    queue: Arc<QueueManager>,
    analyses: Arc<dyn AnalysisStore>,
    generation: Arc<dyn GenerationBackend>,
    remote_cache: Option<Arc<dyn RemoteAnalysisCache>>,
    thumbnails: Option<Arc<dyn ThumbnailSink>>,
    refresher: Option<Arc<dyn DerivedViewRefresher>>,
    workspace: Option<Arc<dyn WorkspaceResolver>>,
    extractor: Arc<dyn ContentExtractor>,
    recovery: Arc<RecoveryManager>,
    unit_policy: UnitPolicy,
    ignore_rules: Arc<IgnoreRules>,
    limiter: ConcurrencyLimiter,
    config: ServiceConfig,
    /// Directory-context results, cached by path for the process lifetime.
    dir_context_cache: Mutex<HashMap<String, String>>,
    paused: AtomicBool,
}

/// Builder for wiring an [`AnalysisService`] with its collaborators.
pub struct ServiceBuilder {
    queue: Arc<QueueManager>,
    analyses: Arc<dyn AnalysisStore>,
    generation: Arc<dyn GenerationBackend>,
    remote_cache: Option<Arc<dyn RemoteAnalysisCache>>,
    thumbnails: Option<Arc<dyn ThumbnailSink>>,
    refresher: Option<Arc<dyn DerivedViewRefresher>>,
    workspace: Option<Arc<dyn WorkspaceResolver>>,
    extractor: Arc<dyn ContentExtractor>,
    recovery: Arc<RecoveryManager>,
    unit_policy: UnitPolicy,
    ignore_rules: Arc<IgnoreRules>,
    limiter: ConcurrencyLimiter,
    config: ServiceConfig,
}

impl ServiceBuilder {
    pub fn new(
        queue: Arc<QueueManager>,
        analyses: Arc<dyn AnalysisStore>,
        generation: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            queue,
            analyses,
            generation,
            remote_cache: None,
            thumbnails: None,
            refresher: None,
            workspace: None,
            extractor: Arc::new(TextExtractor::default()),
            recovery: Arc::new(RecoveryManager::with_defaults()),
            unit_policy: UnitPolicy::default(),
            ignore_rules: Arc::new(IgnoreRules::default()),
            limiter: ConcurrencyLimiter::with_defaults(),
            config: ServiceConfig::default(),
        }
    }

    pub fn with_remote_cache(mut self, cache: Arc<dyn RemoteAnalysisCache>) -> Self {
        self.remote_cache = Some(cache);
        self
    }

    pub fn with_thumbnails(mut self, sink: Arc<dyn ThumbnailSink>) -> Self {
        self.thumbnails = Some(sink);
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn DerivedViewRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_workspace_resolver(mut self, resolver: Arc<dyn WorkspaceResolver>) -> Self {
        self.workspace = Some(resolver);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<RecoveryManager>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_unit_policy(mut self, policy: UnitPolicy) -> Self {
        self.unit_policy = policy;
        self
    }

    pub fn with_ignore_rules(mut self, rules: Arc<IgnoreRules>) -> Self {
        self.ignore_rules = rules;
        self
    }

    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Arc<AnalysisService> {
        Arc::new(AnalysisService {
            queue: self.queue,
            analyses: self.analyses,
            generation: self.generation,
            remote_cache: self.remote_cache,
            thumbnails: self.thumbnails,
            refresher: self.refresher,
            workspace: self.workspace,
            extractor: self.extractor,
            recovery: self.recovery,
            unit_policy: self.unit_policy,
            ignore_rules: self.ignore_rules,
            limiter: self.limiter,
            config: self.config,
            dir_context_cache: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
        })
    }
}

impl AnalysisService {
    /// Start the loop and return a handle for control.
    pub fn start(self: Arc<Self>) -> ServiceHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let service = self.clone();

        tokio::spawn(async move {
            service.run(&mut shutdown_rx).await;
        });

        ServiceHandle {
            shutdown_tx,
            service: self,
        }
    }

    /// Combined statistics for the queue, error history, and limiter.
    pub async fn stats(&self) -> DispatchStats {
        DispatchStats {
            queue: self.queue.stats().await,
            errors: self.recovery.stats(),
            limiter: self.limiter.stats(),
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "dispatch", "Dispatch loop is disabled, not starting");
            return;
        }

        info!(
            subsystem = "dispatch",
            poll_interval_ms = self.config.poll_interval_ms,
            "Dispatch loop started"
        );
        self.queue.set_running(true).await;

        let wake = self.queue.wake_handle();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "dispatch", "Dispatch loop received shutdown signal");
                break;
            }

            let next = if self.paused.load(Ordering::SeqCst) {
                None
            } else {
                self.queue.next_pending().await
            };

            match next {
                Some(item) => {
                    self.process_item(item).await;

                    // Queue fully drained: refresh derived views downstream.
                    if !self.queue.has_pending().await {
                        if let Some(refresher) = &self.refresher {
                            if let Err(e) = refresher.refresh().await {
                                warn!(
                                    subsystem = "dispatch",
                                    error = %e,
                                    "Derived view refresh failed"
                                );
                            }
                        }
                    }
                }
                None => {
                    // Park on the wake signal with a poll fallback so a
                    // dropped signal can never strand enqueued work.
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!(subsystem = "dispatch", "Dispatch loop received shutdown signal");
                            break;
                        }
                        _ = wake.notified() => {}
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }

        self.queue.set_running(false).await;
        info!(subsystem = "dispatch", "Dispatch loop stopped");
    }

    /// Process one claimed item. Never returns an error; failures become
    /// item state.
    async fn process_item(&self, item: WorkItem) {
        let started = Instant::now();
        info!(
            subsystem = "dispatch",
            item_id = %item.id,
            path = %item.path,
            "Analyzing item"
        );

        if let Err(e) = self.queue.begin_analysis(item.id).await {
            error!(subsystem = "dispatch", item_id = %item.id, error = %e, "Failed to claim item");
            sleep(Duration::from_millis(self.config.poll_interval_ms.max(1))).await;
            return;
        }

        let policy = self.recovery.policy();
        let outcome = if item.is_folder() {
            match timeout(policy.file_processing_timeout, self.process_folder(&item)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "folder processing exceeded {:?}",
                    policy.file_processing_timeout
                ))),
            }
        } else {
            match timeout(policy.file_processing_timeout, self.process_file(&item)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "file processing exceeded {:?}",
                    policy.file_processing_timeout
                ))),
            }
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.queue.complete_item(item.id).await {
                    error!(subsystem = "dispatch", item_id = %item.id, error = %e, "Failed to mark item completed");
                } else {
                    info!(
                        subsystem = "dispatch",
                        item_id = %item.id,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Item completed"
                    );
                }
            }
            Err(e) => self.handle_failure(&item, e).await,
        }
    }

    // ------------------------------------------------------------------
    // Folder path
    // ------------------------------------------------------------------

    async fn process_folder(&self, item: &WorkItem) -> Result<()> {
        self.queue.set_progress(item.id, 10).await?;

        // Inference-backed directory context, cached for the process
        // lifetime. Child file analyses reuse it as system context.
        let context = self.directory_context(&item.path, &item.name).await?;
        debug!(
            subsystem = "dispatch",
            path = %item.path,
            context_len = context.len(),
            "Directory context ready"
        );
        self.queue.set_progress(item.id, 40).await?;

        let policy = self.recovery.policy();
        let children = match timeout(
            policy.unit_recognition_timeout,
            self.list_children(&item.path),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "unit recognition exceeded {:?}",
                    policy.unit_recognition_timeout
                )))
            }
        };
        self.queue.set_progress(item.id, 60).await?;

        match self.unit_policy.evaluate(&children) {
            UnitDecision::Unit {
                kind_label,
                member_count,
            } => {
                let workspace_id = self.resolve_workspace(&item.path).await;
                let unit = Unit {
                    id: new_v7(),
                    path: item.path.clone(),
                    name: item.name.clone(),
                    kind_label: kind_label.clone(),
                    member_count: member_count as i32,
                    workspace_id,
                    created_at: Utc::now(),
                };
                self.analyses.persist_unit(&unit).await?;
                info!(
                    subsystem = "dispatch",
                    path = %item.path,
                    kind_label = %kind_label,
                    member_count,
                    "Directory recognized as unit"
                );
            }
            UnitDecision::Expand => {
                let candidates: Vec<EnqueueCandidate> = children
                    .iter()
                    .map(|child| {
                        let path = std::path::Path::new(&item.path)
                            .join(&child.name)
                            .to_string_lossy()
                            .into_owned();
                        EnqueueCandidate {
                            path,
                            kind: if child.is_dir {
                                WorkItemKind::Folder
                            } else {
                                WorkItemKind::File
                            },
                            size: child.size,
                        }
                    })
                    .collect();

                let added = self
                    .queue
                    .enqueue(candidates, false, &self.ignore_rules)
                    .await?;
                debug!(
                    subsystem = "dispatch",
                    path = %item.path,
                    added,
                    "Expanded directory into child items"
                );
            }
        }

        self.queue.set_progress(item.id, 90).await?;
        Ok(())
    }

    async fn directory_context(&self, path: &str, name: &str) -> Result<String> {
        if let Some(context) = self.dir_context_cache.lock().await.get(path) {
            return Ok(context.clone());
        }

        let prompt = format!(
            "A directory named \"{name}\" is being organized. In one or two \
             sentences, describe what kind of content it most likely holds."
        );
        let context = self.run_generation("", &prompt, PRIORITY_DIR_CONTEXT).await?;

        self.dir_context_cache
            .lock()
            .await
            .insert(path.to_string(), context.clone());
        Ok(context)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<ChildEntry>> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut children = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let full = entry.path().to_string_lossy().into_owned();
            if self.ignore_rules.should_ignore(&full, &name) {
                continue;
            }

            let meta = entry.metadata().await?;
            let is_dir = meta.is_dir();
            let extension = if is_dir {
                None
            } else {
                name.rsplit_once('.')
                    .filter(|(stem, _)| !stem.is_empty())
                    .map(|(_, ext)| ext.to_ascii_lowercase())
            };

            children.push(ChildEntry {
                name,
                is_dir,
                extension,
                size: meta.len() as i64,
            });
        }

        Ok(children)
    }

    // ------------------------------------------------------------------
    // File path
    // ------------------------------------------------------------------

    async fn process_file(&self, item: &WorkItem) -> Result<()> {
        // (a) path already analyzed and recache not forced
        if !self.config.force_recache && self.analyses.is_path_analyzed(&item.path).await? {
            debug!(
                subsystem = "dispatch",
                path = %item.path,
                "Path already analyzed, skipping"
            );
            return Ok(());
        }
        self.queue.set_progress(item.id, 10).await?;

        let content_hash = hash_file(&item.path).await;

        // (b) local store: byte-identical content analyzed at another path
        if let Some(prior) = self.analyses.lookup_by_hash(&content_hash).await? {
            debug!(
                subsystem = "dispatch",
                path = %item.path,
                content_hash = %content_hash,
                "Local cache hit, reusing analysis"
            );
            return self.persist_reused(item, &content_hash, prior).await;
        }

        // (c) remote/shared cache
        if let Some(cache) = &self.remote_cache {
            if let Some(prior) = cache.lookup(&content_hash).await? {
                debug!(
                    subsystem = "dispatch",
                    path = %item.path,
                    content_hash = %content_hash,
                    "Remote cache hit, reusing analysis"
                );
                return self.persist_reused(item, &content_hash, prior).await;
            }
        }

        self.queue.set_progress(item.id, 30).await?;

        // Full pipeline: extract, thumbnail (best-effort), analyze, persist.
        let content = self.extractor.extract(&item.path).await?;
        self.queue.set_progress(item.id, 50).await?;

        if let Some(thumbnails) = &self.thumbnails {
            if let Err(e) = thumbnails.generate(&item.path).await {
                warn!(
                    subsystem = "dispatch",
                    path = %item.path,
                    error = %e,
                    "Thumbnail generation failed, continuing"
                );
            }
        }

        let system = self.parent_context(&item.path).await.unwrap_or_default();
        let excerpt = excerpt(&content.text, defaults::PROMPT_EXCERPT_CHARS);

        let quality_prompt = format!(
            "Rate the overall quality of this content from 0 to 10. Reply \
             with only the number.\n\n{excerpt}"
        );
        let dims_prompt = format!(
            "Score this content on clarity, relevance, and completeness, each \
             0 to 10. Reply with a JSON object of name to score.\n\n{excerpt}"
        );
        let tags_prompt = format!(
            "List up to 8 short tags for this content as a JSON array of \
             strings.\n\n{excerpt}"
        );
        let summary_prompt = format!("Summarize this content in one sentence.\n\n{excerpt}");

        let analysis = tokio::try_join!(
            self.run_generation(&system, &quality_prompt, PRIORITY_QUALITY),
            self.run_generation(&system, &dims_prompt, PRIORITY_DIMENSIONS),
            self.run_generation(&system, &tags_prompt, PRIORITY_TAGS),
            self.run_generation(&system, &summary_prompt, PRIORITY_SUMMARY),
        );
        self.queue.set_progress(item.id, 80).await?;

        let mut record = AnalysisRecord::new(content_hash, item.path.clone());
        record.model = Some(self.generation.model_name().to_string());

        match analysis {
            Ok((quality, dims, tags, summary)) => {
                record.quality_score = parse_quality_score(&quality);
                record.dimensions = parse_dimensions(&dims);
                record.tags = parse_tags(&tags);
                record.summary = Some(summary.trim().to_string());
            }
            Err(e)
                if self.recovery.policy().fallback_to_basic_analysis
                    && matches!(e, Error::Inference(_) | Error::Embedding(_)) =>
            {
                warn!(
                    subsystem = "dispatch",
                    path = %item.path,
                    error = %e,
                    "AI analysis unavailable, persisting basic record"
                );
            }
            Err(e) => return Err(e),
        }

        self.analyses.persist(&record).await?;
        self.queue.set_progress(item.id, 95).await?;
        Ok(())
    }

    /// Persist a cache-hit analysis under the new path, tag relations
    /// included, in the store's single transaction.
    async fn persist_reused(
        &self,
        item: &WorkItem,
        content_hash: &str,
        prior: AnalysisRecord,
    ) -> Result<()> {
        let record = AnalysisRecord {
            id: new_v7(),
            content_hash: content_hash.to_string(),
            path: item.path.clone(),
            created_at: Utc::now(),
            ..prior
        };
        self.analyses.persist(&record).await
    }

    /// Run one generation call through the concurrency limiter. Limiter
    /// timeouts are surfaced as inference failures so classification lands
    /// on the AI stage.
    async fn run_generation(&self, system: &str, prompt: &str, priority: i32) -> Result<String> {
        let backend = self.generation.clone();
        let system = system.to_string();
        let prompt = prompt.to_string();
        let task = async move {
            if system.is_empty() {
                backend.generate(&prompt).await
            } else {
                backend.generate_with_system(&system, &prompt).await
            }
        };

        self.limiter
            .execute(task, priority, Some(self.recovery.policy().inference_timeout))
            .await
            .map_err(|e| match e {
                Error::Timeout(msg) => Error::Inference(format!("request timed out: {msg}")),
                other => other,
            })
    }

    async fn parent_context(&self, path: &str) -> Option<String> {
        let parent = std::path::Path::new(path)
            .parent()?
            .to_string_lossy()
            .into_owned();
        self.dir_context_cache.lock().await.get(&parent).cloned()
    }

    async fn resolve_workspace(&self, path: &str) -> Option<Uuid> {
        let resolver = self.workspace.as_ref()?;
        match resolver.resolve(path).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    subsystem = "dispatch",
                    path,
                    error = %e,
                    "Workspace resolution failed"
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------

    async fn handle_failure(&self, item: &WorkItem, error: Error) {
        let stage = if item.is_folder() {
            FailureStage::Unit
        } else {
            FailureStage::Processing
        };
        let kind = classify_failure(&error, stage);
        let message = error.to_string();
        let stats = self
            .recovery
            .record(kind, &message, Some(&item.path), item.retry_count);

        warn!(
            subsystem = "dispatch",
            item_id = %item.id,
            path = %item.path,
            error_kind = kind.as_str(),
            retry_count = item.retry_count,
            errors_last_hour = stats.last_hour,
            error = %message,
            "Item analysis failed"
        );

        if self.recovery.is_critical(kind) {
            error!(
                subsystem = "dispatch",
                error_kind = kind.as_str(),
                "Critical failure, pausing dispatch"
            );
            if let Err(e) = self.queue.fail_item(item.id, &message).await {
                error!(subsystem = "dispatch", item_id = %item.id, error = %e, "Failed to record failure");
            }
            self.paused.store(true, Ordering::SeqCst);
            return;
        }

        if self
            .recovery
            .should_retry(kind, item.retry_count, Some(item.size))
        {
            let delay = self.recovery.retry_delay(item.retry_count, kind);
            if let Err(e) = self.queue.fail_item(item.id, &message).await {
                error!(subsystem = "dispatch", item_id = %item.id, error = %e, "Failed to record failure");
                return;
            }

            debug!(
                subsystem = "dispatch",
                item_id = %item.id,
                retry_delay_ms = delay.as_millis() as u64,
                "Scheduling retry after backoff"
            );
            let queue = self.queue.clone();
            let id = item.id;
            let next_retry = item.retry_count + 1;
            let msg = message.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                if let Err(e) = queue.requeue_item(id, next_retry, &msg).await {
                    warn!(subsystem = "dispatch", item_id = %id, error = %e, "Retry re-queue failed");
                }
            });
        } else {
            // Permanent: attach the recovery hint for the user.
            let full = format!("{message} ({})", kind.recovery_hint());
            if let Err(e) = self.queue.fail_item(item.id, &full).await {
                error!(subsystem = "dispatch", item_id = %item.id, error = %e, "Failed to record failure");
            }
        }
    }
}

// ----------------------------------------------------------------------
// Response parsing
// ----------------------------------------------------------------------

/// First numeric token in the response, clamped to the 0-10 score range.
pub fn parse_quality_score(response: &str) -> Option<f32> {
    response
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|token| !token.is_empty() && *token != ".")
        .find_map(|token| token.parse::<f32>().ok())
        .map(|score| score.clamp(0.0, 10.0))
}

/// Tags from a JSON array response, with a delimiter-split fallback for
/// models that ignore the format instruction.
pub fn parse_tags(response: &str) -> Vec<String> {
    if let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) {
        if start < end {
            if let Ok(tags) = serde_json::from_str::<Vec<String>>(&response[start..=end]) {
                return normalize_tags(tags);
            }
        }
    }
    normalize_tags(
        response
            .split([',', '\n'])
            .map(|s| s.to_string())
            .collect(),
    )
}

fn normalize_tags(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut tags = Vec::new();
    for tag in raw {
        let tag = tag
            .trim()
            .trim_matches('"')
            .trim_start_matches('-')
            .trim()
            .to_lowercase();
        if tag.is_empty() || tag.len() > 60 {
            continue;
        }
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
        if tags.len() == 12 {
            break;
        }
    }
    tags
}

/// Dimension scores from a JSON object response; non-numeric values are
/// dropped, unparseable responses yield an empty map.
pub fn parse_dimensions(response: &str) -> HashMap<String, f32> {
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            if let Ok(map) =
                serde_json::from_str::<HashMap<String, serde_json::Value>>(&response[start..=end])
            {
                return map
                    .into_iter()
                    .filter_map(|(name, value)| value.as_f64().map(|v| (name, v as f32)))
                    .collect();
            }
        }
    }
    HashMap::new()
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
