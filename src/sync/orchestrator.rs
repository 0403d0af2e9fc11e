// ABOUTME: Per-endpoint pull loop: watermark, concurrent page rounds, ordered processing
// ABOUTME: Shrinks concurrency when most of a round fails and records per-endpoint stats

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;

use super::reconciler::Reconciler;
use super::retry::{with_backoff, BackoffPolicy};
use crate::feed;
use crate::mapping::extract_all;
use crate::registry::EndpointDescriptor;
use crate::remote::{FetchError, PageFetcher};
use crate::store::Store;

/// Configuration for an orchestrated run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Page fetches issued per round at the start of each endpoint
    pub max_concurrent: usize,
    /// Records per reconciler transaction
    pub chunk_size: usize,
    /// Backoff applied to each page fetch on transient failures
    pub backoff: BackoffPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            chunk_size: 5000,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Counters for one endpoint run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointStats {
    pub rounds: usize,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub pages_malformed: usize,
    pub entries_seen: usize,
    pub records_skipped: usize,
    pub inserted: u64,
    pub updated: u64,
    /// Optional fields whose text failed to coerce and fell back to a default
    pub coercion_failures: usize,
    pub watermark: Option<DateTime<Utc>>,
    pub final_concurrency: usize,
    pub duration_ms: u64,
}

/// Result of one endpoint: counters, plus the error that ended it early
#[derive(Debug)]
pub struct EndpointOutcome {
    pub endpoint: String,
    pub stats: EndpointStats,
    pub error: Option<anyhow::Error>,
}

impl EndpointOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub endpoints: Vec<EndpointOutcome>,
}

impl RunSummary {
    pub fn failed(&self) -> impl Iterator<Item = &EndpointOutcome> {
        self.endpoints.iter().filter(|o| !o.succeeded())
    }

    pub fn total_inserted(&self) -> u64 {
        self.endpoints.iter().map(|o| o.stats.inserted).sum()
    }

    pub fn total_updated(&self) -> u64 {
        self.endpoints.iter().map(|o| o.stats.updated).sum()
    }
}

/// Drives endpoints one after another through fetch, parse, map and reconcile.
pub struct Orchestrator {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn Store>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn Store>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Run every endpoint in order. Failures are logged and recorded; they
    /// never stop later endpoints.
    pub async fn run(&self, endpoints: &[&EndpointDescriptor]) -> RunSummary {
        let mut summary = RunSummary::default();

        for endpoint in endpoints {
            let outcome = self.run_endpoint(endpoint).await;
            match &outcome.error {
                None => tracing::info!(
                    "✓ {}: {} inserted, {} updated, {} skipped, {} coercion failures ({}ms)",
                    endpoint.name,
                    outcome.stats.inserted,
                    outcome.stats.updated,
                    outcome.stats.records_skipped,
                    outcome.stats.coercion_failures,
                    outcome.stats.duration_ms
                ),
                Some(e) => tracing::error!("✗ {} abandoned: {:?}", endpoint.name, e),
            }
            summary.endpoints.push(outcome);
        }

        summary
    }

    pub async fn run_endpoint(&self, endpoint: &EndpointDescriptor) -> EndpointOutcome {
        let start = Instant::now();
        let mut stats = EndpointStats::default();
        let error = self.sync_endpoint(endpoint, &mut stats).await.err();
        stats.duration_ms = start.elapsed().as_millis() as u64;

        EndpointOutcome {
            endpoint: endpoint.name.clone(),
            stats,
            error,
        }
    }

    async fn sync_endpoint(
        &self,
        endpoint: &EndpointDescriptor,
        stats: &mut EndpointStats,
    ) -> Result<()> {
        let schema = &endpoint.schema;
        let watermark = if endpoint.incremental {
            self.store
                .max_update_timestamp(schema)
                .await
                .with_context(|| format!("Failed to read watermark for {}", endpoint.name))?
        } else {
            None
        };
        stats.watermark = watermark;

        match watermark {
            Some(ts) => tracing::info!("{}: fetching records updated after {}", endpoint.name, ts),
            None => tracing::info!("{}: fetching all records", endpoint.name),
        }

        let page_size = self.fetcher.page_size();
        let mut concurrency = self.config.max_concurrent.max(1);
        let mut skip = 0usize;

        loop {
            stats.rounds += 1;
            stats.final_concurrency = concurrency;

            let skips: Vec<usize> = (0..concurrency).map(|i| skip + i * page_size).collect();
            let results = join_all(
                skips
                    .iter()
                    .map(|&page_skip| self.fetch_page(endpoint, watermark, page_skip)),
            )
            .await;
            skip += concurrency * page_size;

            let failures = results.iter().filter(|r| r.is_err()).count();
            let mut parsed = 0usize;
            let mut finished = false;

            // Pages are processed in request order regardless of completion order.
            for (page_skip, result) in skips.into_iter().zip(results) {
                match result {
                    Ok(body) => {
                        stats.pages_fetched += 1;
                        let count = self
                            .process_page(endpoint, &body, page_skip, stats)
                            .await?;
                        if let Some(n) = count {
                            parsed += 1;
                            if n < page_size {
                                finished = true;
                            }
                        }
                    }
                    Err(e) => {
                        stats.pages_failed += 1;
                        tracing::error!(
                            "{}: page at skip {} failed: {}",
                            endpoint.name,
                            page_skip,
                            e
                        );
                    }
                }
            }

            if finished {
                break;
            }
            // A round that produced no usable page would otherwise repeat forever.
            if parsed == 0 {
                return Err(anyhow!(
                    "no usable page in round {} ({} failed, {} malformed; skip {} onwards)",
                    stats.rounds,
                    failures,
                    concurrency - failures,
                    skip - concurrency * page_size
                ));
            }
            let reduced = adjust_concurrency(concurrency, failures);
            if reduced != concurrency {
                tracing::warn!(
                    "{}: {} of {} fetches failed, reducing concurrency to {}",
                    endpoint.name,
                    failures,
                    concurrency,
                    reduced
                );
                concurrency = reduced;
            }
        }

        stats.final_concurrency = concurrency;
        Ok(())
    }

    async fn fetch_page(
        &self,
        endpoint: &EndpointDescriptor,
        watermark: Option<DateTime<Utc>>,
        skip: usize,
    ) -> Result<String, FetchError> {
        with_backoff(
            &self.config.backoff,
            || self.fetcher.fetch_page(&endpoint.url, watermark, skip),
            FetchError::is_transient,
        )
        .await
    }

    /// Parse, map and persist one page. Returns the number of entries on the
    /// page, or `None` when the page was malformed and contributed nothing.
    async fn process_page(
        &self,
        endpoint: &EndpointDescriptor,
        body: &str,
        skip: usize,
        stats: &mut EndpointStats,
    ) -> Result<Option<usize>> {
        if body.trim().is_empty() {
            return Ok(Some(0));
        }

        let entries = match feed::parse(body) {
            Ok(entries) => entries,
            Err(e) => {
                stats.pages_malformed += 1;
                tracing::error!("{}: page at skip {} is unusable: {}", endpoint.name, skip, e);
                return Ok(None);
            }
        };
        stats.entries_seen += entries.len();

        let batch = extract_all(&entries, &endpoint.schema);
        stats.records_skipped += batch.skipped;
        stats.coercion_failures += batch.degraded_fields;

        let reconciler = Reconciler::new(self.store.as_ref(), self.config.chunk_size);
        match reconciler.apply(&endpoint.schema, batch.records).await {
            Ok(outcome) => {
                stats.inserted += outcome.inserted;
                stats.updated += outcome.updated;
                tracing::info!(
                    "{}: page at skip {}: {} entries, {} inserted, {} updated",
                    endpoint.name,
                    skip,
                    entries.len(),
                    outcome.inserted,
                    outcome.updated
                );
            }
            Err(e) => {
                let committed = e.committed();
                stats.inserted += committed.inserted;
                stats.updated += committed.updated;
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to persist page at skip {}", skip)));
            }
        }

        Ok(Some(entries.len()))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One step down when more than half of a round failed; never below one and
/// never back up within an endpoint run.
pub fn adjust_concurrency(current: usize, failures: usize) -> usize {
    if failures * 2 > current {
        current.saturating_sub(1).max(1)
    } else {
        current
    }
}
