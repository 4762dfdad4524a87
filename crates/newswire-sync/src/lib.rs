//! Ingestion pipeline orchestration: per-source ingestion, fleet runs, item
//! lifecycle, scheduling and source registry seeding.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use newswire_adapters::{FeedFetcher, HttpFeedFetcher};
use newswire_core::{validate_feed_url, FeedProbe, NewSource, RunReport, Source};
use newswire_storage::{
    HttpClientConfig, HttpFetcher, ItemRepository, NewsStore, PgStore, PostedLinkRepository,
    SourceRepository, StorageError,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

pub mod config;
pub mod fleet;
pub mod ingest;
pub mod lifecycle;
pub mod registry;

#[cfg(test)]
mod testing;

pub use config::{ScheduleTimezone, SyncConfig};
pub use fleet::FleetAggregator;
pub use ingest::{IngestError, IngestionCoordinator, SourceIngest};
pub use lifecycle::{LifecycleManager, TransitionError, TransitionPolicy};
pub use registry::{RegistryEntry, SeedSummary, SourceRegistry};

pub const CRATE_NAME: &str = "newswire-sync";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_concurrent_fetches: usize,
    pub run_deadline: Option<Duration>,
    pub transition_policy: TransitionPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: config::DEFAULT_MAX_CONCURRENT_FETCHES,
            run_deadline: None,
            transition_policy: TransitionPolicy::Strict,
        }
    }
}

impl From<&SyncConfig> for PipelineOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_concurrent_fetches: config.max_concurrent_fetches,
            run_deadline: config.run_deadline,
            transition_policy: config.transition_policy,
        }
    }
}

/// Dry run of the fetcher against `url`. Never touches storage.
pub async fn probe_feed(fetcher: &dyn FeedFetcher, url: &str) -> FeedProbe {
    if let Err(err) = validate_feed_url(url) {
        return FeedProbe::invalid(err.to_string());
    }
    match fetcher.fetch(url).await {
        Ok(feed) => FeedProbe::valid(feed.entries.len(), feed.title),
        Err(err) => FeedProbe::invalid(err.to_string()),
    }
}

/// The assembled pipeline. Every collaborator is passed in explicitly.
pub struct NewsPipeline {
    sources: Arc<dyn SourceRepository>,
    fetcher: Arc<dyn FeedFetcher>,
    fleet: FleetAggregator,
    lifecycle: LifecycleManager,
}

impl NewsPipeline {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        items: Arc<dyn ItemRepository>,
        posted: Arc<dyn PostedLinkRepository>,
        fetcher: Arc<dyn FeedFetcher>,
        options: PipelineOptions,
    ) -> Self {
        let coordinator = Arc::new(IngestionCoordinator::new(fetcher.clone(), items.clone()));
        let fleet = FleetAggregator::new(sources.clone(), coordinator, options.max_concurrent_fetches)
            .with_deadline(options.run_deadline);
        let lifecycle = LifecycleManager::new(sources.clone(), items, posted, options.transition_policy);
        Self {
            sources,
            fetcher,
            fleet,
            lifecycle,
        }
    }

    /// Wires every repository role to one store.
    pub fn with_store<S>(store: Arc<S>, fetcher: Arc<dyn FeedFetcher>, options: PipelineOptions) -> Self
    where
        S: NewsStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store, fetcher, options)
    }

    /// Postgres store plus HTTP fetcher, configured from `config`.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let store = PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?;
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            global_concurrency: config.max_concurrent_fetches,
            ..Default::default()
        })?;
        let fetcher = Arc::new(HttpFeedFetcher::new(Arc::new(http)));
        Ok(Self::with_store(Arc::new(store), fetcher, PipelineOptions::from(config)))
    }

    pub fn sources(&self) -> &Arc<dyn SourceRepository> {
        &self.sources
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub async fn register_source(&self, tenant_id: Uuid, new: NewSource) -> Result<Source, StorageError> {
        let source = self.sources.create_source(tenant_id, new).await?;
        info!(source_id = %source.id, %tenant_id, url = %source.url, "source registered");
        Ok(source)
    }

    pub async fn run_fetch_cycle(&self, tenant_id: Option<Uuid>) -> Result<RunReport, StorageError> {
        self.fleet.run_fetch_cycle(tenant_id).await
    }

    pub async fn test_feed_url(&self, url: &str) -> FeedProbe {
        probe_feed(self.fetcher.as_ref(), url).await
    }
}

fn scheduled_run(
    pipeline: Arc<NewsPipeline>,
) -> impl FnMut(Uuid, JobScheduler) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
    move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            match pipeline.run_fetch_cycle(None).await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    successful = report.successful,
                    failed = report.failed,
                    new_items = report.new_items,
                    "scheduled fetch cycle complete"
                ),
                Err(err) => error!(error = %err, "scheduled fetch cycle failed"),
            }
        })
    }
}

/// Registers the hourly and business-hours jobs when scheduling is enabled.
/// Cron fields are read in the configured timezone, local time by default.
/// A failed run is logged and the scheduler keeps going.
pub async fn maybe_build_scheduler(
    pipeline: Arc<NewsPipeline>,
    config: &SyncConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.hourly_cron, &config.business_hours_cron] {
        let job = match config.schedule_timezone {
            ScheduleTimezone::Local => {
                Job::new_async_tz(cron.as_str(), chrono::Local, scheduled_run(pipeline.clone()))
            }
            ScheduleTimezone::Utc => {
                Job::new_async_tz(cron.as_str(), chrono::Utc, scheduled_run(pipeline.clone()))
            }
        }
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}

pub async fn run_fetch_cycle_from_env(tenant_id: Option<Uuid>) -> Result<RunReport> {
    let config = SyncConfig::from_env();
    let pipeline = NewsPipeline::from_config(&config).await?;
    pipeline
        .run_fetch_cycle(tenant_id)
        .await
        .context("running fetch cycle")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use newswire_core::ItemStatus;
    use newswire_storage::MemoryStore;

    use super::*;
    use crate::testing::{entry, StubFetcher};

    #[tokio::test]
    async fn probe_reports_title_and_count() {
        let fetcher = StubFetcher::new().with_feed(
            "https://example.com/feed",
            vec![entry("A", "https://example.com/a"), entry("B", "https://example.com/b")],
        );
        let probe = probe_feed(&fetcher, "https://example.com/feed").await;
        assert!(probe.valid);
        assert_eq!(probe.item_count, Some(2));
        assert_eq!(probe.feed_title.as_deref(), Some("Feed at https://example.com/feed"));
        assert!(probe.error.is_none());
    }

    #[tokio::test]
    async fn probe_of_unreachable_feed_is_invalid_and_stores_nothing() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new().with_failure("https://down.example.com/feed", 503));
        let pipeline = NewsPipeline::with_store(store.clone(), fetcher, PipelineOptions::default());

        let probe = pipeline.test_feed_url("https://down.example.com/feed").await;
        assert!(!probe.valid);
        assert!(probe.error.unwrap().contains("503"));
        assert_eq!(store.item_count().await, 0);
    }

    #[tokio::test]
    async fn probe_rejects_non_http_urls_without_fetching() {
        let fetcher = StubFetcher::new();
        let probe = probe_feed(&fetcher, "file:///etc/passwd").await;
        assert!(!probe.valid);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn end_to_end_ingest_then_post() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::new().with_feed(
            "https://www.mortgagenewsdaily.com/rss",
            vec![entry("Rates ease", "https://www.mortgagenewsdaily.com/rates-ease")],
        ));
        let pipeline = NewsPipeline::with_store(store.clone(), fetcher, PipelineOptions::default());
        let tenant = Uuid::new_v4();

        pipeline
            .register_source(tenant, NewSource::new("Mortgage News Daily", "https://www.mortgagenewsdaily.com/rss"))
            .await
            .unwrap();
        let report = pipeline.run_fetch_cycle(Some(tenant)).await.unwrap();
        assert_eq!((report.total, report.successful, report.new_items), (1, 1, 1));

        let rerun = pipeline.run_fetch_cycle(Some(tenant)).await.unwrap();
        assert_eq!(rerun.new_items, 0);

        let lifecycle = pipeline.lifecycle();
        let pending = lifecycle.pending_items(tenant, None).await.unwrap();
        assert_eq!(pending.len(), 1);
        lifecycle.mark_posted(pending[0].id, "post-1", tenant).await.unwrap();
        let item = store.get_item(pending[0].id, tenant).await.unwrap();
        assert_eq!(item.status, ItemStatus::Posted);
    }

    #[tokio::test]
    async fn invalid_source_never_reaches_the_pipeline() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = NewsPipeline::with_store(store.clone(), Arc::new(StubFetcher::new()), PipelineOptions::default());
        let err = pipeline
            .register_source(Uuid::new_v4(), NewSource::new("Local", "file:///tmp/feed.xml"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert!(store.list_active_sources(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scheduler_is_not_built_when_disabled() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(NewsPipeline::with_store(
            store,
            Arc::new(StubFetcher::new()),
            PipelineOptions::default(),
        ));
        let sched = maybe_build_scheduler(pipeline, &SyncConfig::default()).await.unwrap();
        assert!(sched.is_none());
    }

    #[tokio::test]
    async fn scheduler_accepts_both_timezones() {
        for schedule_timezone in [ScheduleTimezone::Local, ScheduleTimezone::Utc] {
            let pipeline = Arc::new(NewsPipeline::with_store(
                Arc::new(MemoryStore::new()),
                Arc::new(StubFetcher::new()),
                PipelineOptions::default(),
            ));
            let config = SyncConfig {
                scheduler_enabled: true,
                schedule_timezone,
                ..SyncConfig::default()
            };
            let sched = maybe_build_scheduler(pipeline, &config).await.unwrap();
            assert!(sched.is_some());
        }
    }
}
