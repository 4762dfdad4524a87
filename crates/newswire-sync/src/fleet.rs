//! Fan-out over every active source with per-source failure isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use newswire_core::{RunReport, SourceFailure};
use newswire_storage::{SourceRepository, StorageError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ingest::{IngestError, IngestionCoordinator, SourceIngest};

struct SourceOutcome {
    source_id: Uuid,
    source_name: String,
    result: Result<SourceIngest, IngestError>,
}

pub struct FleetAggregator {
    sources: Arc<dyn SourceRepository>,
    coordinator: Arc<IngestionCoordinator>,
    max_concurrent: usize,
    deadline: Option<Duration>,
}

impl FleetAggregator {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        coordinator: Arc<IngestionCoordinator>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            sources,
            coordinator,
            max_concurrent: max_concurrent.max(1),
            deadline: None,
        }
    }

    /// Sources still running when the deadline passes are aborted and
    /// reported as failed.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs one ingestion pass per active source. Only failing to load the
    /// source list fails the run; every per-source error lands in the report.
    pub async fn run_fetch_cycle(&self, tenant_id: Option<Uuid>) -> Result<RunReport, StorageError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let sources = self.sources.list_active_sources(tenant_id).await?;

        let mut report = RunReport::empty(run_id, started_at);
        report.total = sources.len();

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let (tx, mut rx) = mpsc::channel::<SourceOutcome>(sources.len().max(1));
        let mut pending = HashMap::with_capacity(sources.len());
        let mut tasks = JoinSet::new();

        for source in sources {
            pending.insert(source.id, source.name.clone());
            let permits = permits.clone();
            let tx = tx.clone();
            let coordinator = self.coordinator.clone();
            let repo = self.sources.clone();
            let span = info_span!("ingest_source", %run_id, source_id = %source.id, source_name = %source.name);

            tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await.ok();
                    let result = coordinator
                        .ingest_source(source.id, source.tenant_id, &source.url)
                        .await;
                    if result.is_ok() {
                        if let Err(err) = repo.update_source_last_fetched(source.id, Utc::now()).await {
                            warn!(error = %err, "failed to record last fetch time");
                        }
                    }
                    let _ = tx
                        .send(SourceOutcome {
                            source_id: source.id,
                            source_name: source.name,
                            result,
                        })
                        .await;
                }
                .instrument(span),
            );
        }
        drop(tx);

        let collect = async {
            while let Some(outcome) = rx.recv().await {
                pending.remove(&outcome.source_id);
                tally(&mut report, outcome);
            }
        };
        let timed_out = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, collect).await.is_err(),
            None => {
                collect.await;
                false
            }
        };

        if timed_out {
            // Outcomes already buffered belong to sources that finished in time.
            drain_ready(&mut rx, &mut pending, &mut report);
            tasks.abort_all();
        }
        while tasks.join_next().await.is_some() {}

        let unfinished = if timed_out {
            "run deadline exceeded before the source finished"
        } else {
            "ingest task ended without reporting"
        };
        for (source_id, source_name) in pending {
            warn!(%run_id, %source_id, source_name = %source_name, error = unfinished, "source fetch failed");
            report.failed += 1;
            report.failures.push(SourceFailure {
                source_id,
                source_name,
                error: unfinished.to_string(),
            });
        }

        report.finished_at = Utc::now();
        info!(
            %run_id,
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            new_items = report.new_items,
            "fetch cycle finished"
        );
        Ok(report)
    }
}

fn drain_ready(
    rx: &mut mpsc::Receiver<SourceOutcome>,
    pending: &mut HashMap<Uuid, String>,
    report: &mut RunReport,
) {
    while let Ok(outcome) = rx.try_recv() {
        pending.remove(&outcome.source_id);
        tally(report, outcome);
    }
}

fn tally(report: &mut RunReport, outcome: SourceOutcome) {
    match outcome.result {
        Ok(ingest) => {
            report.successful += 1;
            report.new_items += ingest.new_items;
        }
        Err(err) => {
            warn!(
                source_id = %outcome.source_id,
                source_name = %outcome.source_name,
                error = %err,
                retryable = err.is_retryable(),
                "source fetch failed"
            );
            report.failed += 1;
            report.failures.push(SourceFailure {
                source_id: outcome.source_id,
                source_name: outcome.source_name,
                error: err.to_string(),
            });
        }
    }
}
