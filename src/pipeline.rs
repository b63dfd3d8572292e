//! End-to-end run: fetch, persist, score, publish, verify.
//!
//! Stages run strictly in order and each hands its output to the next by value. Fetch
//! degradation and verify problems end up in [`RunSummary::warnings`]; every other error
//! stops the run in [`Stage::Failed`].

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fetch::{fetch_or_recover, FetchOutcome, FetchRequest, HttpSource};
use crate::observation::write_scored_csv;
use crate::publish::{publish, verify, ObjectStore, Publication, PublishTarget, VerificationResult};
use crate::scoring::stats::{render_table, ColumnSummary};
use crate::scoring::{describe, score, LabelCounts};
use crate::store::SeriesStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Persisting,
    Scoring,
    Publishing,
    Verifying,
    Done,
    Failed,
}

#[derive(Debug, Error)]
#[error("run failed while {stage:?}: {error}")]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSource {
    Live,
    Cache { cause: String },
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub source: SeriesSource,
    pub rows_persisted: usize,
    pub rows_scored: usize,
    pub counts: LabelCounts,
    pub columns: Vec<ColumnSummary>,
    pub publication: Publication,
    pub verification: Option<VerificationResult>,
    pub warnings: Vec<String>,
    pub final_stage: Stage,
}

impl RunSummary {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== SUMMARY ===");
        let _ = writeln!(out, "started: {}", self.started_at.to_rfc3339());
        match &self.source {
            SeriesSource::Live => {
                let _ = writeln!(out, "source: live API");
            }
            SeriesSource::Cache { cause } => {
                let _ = writeln!(out, "source: cached raw CSV ({cause})");
            }
        }
        let _ = writeln!(
            out,
            "rows: persisted {}, scored {}",
            self.rows_persisted, self.rows_scored
        );
        out.push('\n');
        out.push_str(&render_table(&self.columns));
        let _ = writeln!(
            out,
            "\nCounts: anomalous={} normal={}",
            self.counts.anomalies, self.counts.normals
        );
        let _ = writeln!(out, "Public URL: {}", self.publication.url);
        match &self.verification {
            Some(result) => {
                let _ = writeln!(
                    out,
                    "Verify GET: {} - {} bytes (local {}) {}",
                    result.status,
                    result.bytes,
                    result.expected_bytes,
                    if result.bytes_match() { "OK" } else { "SIZE MISMATCH" }
                );
                let _ = writeln!(out, "First bytes:\n{}", result.snippet);
            }
            None => {
                let _ = writeln!(out, "Verify GET: FAIL");
            }
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "Warnings:");
            for warning in &self.warnings {
                let _ = writeln!(out, " - {warning}");
            }
        }
        out
    }
}

struct StageTracker {
    current: Stage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: Stage::Fetching,
        }
    }

    fn enter(&mut self, stage: Stage) {
        tracing::info!(from = ?self.current, to = ?stage, "stage transition");
        self.current = stage;
    }

    fn fail(&mut self, error: PipelineError) -> RunFailure {
        let stage = self.current;
        tracing::error!(stage = ?stage, kind = error.kind(), error = %error, "run aborted");
        self.current = Stage::Failed;
        RunFailure { stage, error }
    }
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    http: &'a dyn HttpSource,
    objects: &'a dyn ObjectStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        http: &'a dyn HttpSource,
        objects: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            config,
            http,
            objects,
        }
    }

    pub fn run(&self, sleep: &mut dyn FnMut(Duration)) -> Result<RunSummary, RunFailure> {
        let started_at = Utc::now();
        let config = self.config;
        let mut tracker = StageTracker::new();
        let mut warnings = Vec::new();
        tracing::info!(stage = ?Stage::Fetching, "run started");

        let request = FetchRequest::from_config(config);
        let outcome = fetch_or_recover(self.http, &request, &config.raw_csv_path, sleep)
            .map_err(|err| tracker.fail(err))?;
        if let Some(degraded) = outcome.degradation() {
            tracing::warn!(kind = degraded.kind(), "{degraded}");
            warnings.push(degraded.to_string());
        }
        let source = match &outcome {
            FetchOutcome::Fresh(_) => SeriesSource::Live,
            FetchOutcome::Cached { cause, .. } => SeriesSource::Cache {
                cause: cause.clone(),
            },
        };
        let series = outcome.into_series();

        tracker.enter(Stage::Persisting);
        let mut store = SeriesStore::open(&config.db_path, &config.table)
            .map_err(|err| tracker.fail(err))?;
        let rows_persisted = store.persist(&series).map_err(|err| tracker.fail(err))?;
        drop(series);
        tracing::info!(path = %config.db_path.display(), table = store.table(), "wrote table");

        tracker.enter(Stage::Scoring);
        let loaded = store.load().map_err(|err| tracker.fail(err))?;
        drop(store);
        let scored = score(loaded, config.contamination, config.seed)
            .map_err(|err| tracker.fail(err))?;
        write_scored_csv(&config.processed_csv_path, &scored).map_err(|err| tracker.fail(err))?;
        tracing::info!(path = %config.processed_csv_path.display(), "saved scored artifact");
        let counts = LabelCounts::tally(&scored);
        let columns = describe(&scored);
        let rows_scored = scored.len();
        drop(scored);

        tracker.enter(Stage::Publishing);
        let target = PublishTarget::from_config(config);
        let publication = publish(self.objects, &target, &config.processed_csv_path)
            .map_err(|err| tracker.fail(err))?;
        tracing::info!(url = %publication.url, "published artifact");

        tracker.enter(Stage::Verifying);
        let verification = check_published(self.http, &publication, config.http_timeout, &mut warnings);

        tracker.enter(Stage::Done);
        Ok(RunSummary {
            started_at,
            source,
            rows_persisted,
            rows_scored,
            counts,
            columns,
            publication,
            verification,
            warnings,
            final_stage: tracker.current,
        })
    }

    /// Publishes an already-scored artifact and verifies it, without fetching or scoring.
    pub fn publish_existing(
        &self,
        artifact: &Path,
    ) -> Result<(Publication, Option<VerificationResult>, Vec<String>), RunFailure> {
        let mut tracker = StageTracker {
            current: Stage::Publishing,
        };
        let target = PublishTarget::from_config(self.config);
        let publication =
            publish(self.objects, &target, artifact).map_err(|err| tracker.fail(err))?;
        tracker.enter(Stage::Verifying);
        let mut warnings = Vec::new();
        let verification =
            check_published(self.http, &publication, self.config.http_timeout, &mut warnings);
        tracker.enter(Stage::Done);
        Ok((publication, verification, warnings))
    }
}

fn check_published(
    http: &dyn HttpSource,
    publication: &Publication,
    timeout: Duration,
    warnings: &mut Vec<String>,
) -> Option<VerificationResult> {
    match verify(http, &publication.url, publication.bytes, timeout) {
        Ok(result) => {
            if !result.bytes_match() {
                warnings.push(format!(
                    "verify: fetched {} bytes, local artifact has {}",
                    result.bytes, result.expected_bytes
                ));
            }
            Some(result)
        }
        Err(err) => {
            tracing::warn!(kind = err.kind(), error = %err, "verify failed; publish stands");
            warnings.push(err.to_string());
            None
        }
    }
}

/// Scores a raw CSV into a processed CSV without touching the database or object store.
pub fn score_file(
    input: &Path,
    output: &Path,
    contamination: f64,
    seed: u64,
) -> Result<(LabelCounts, Vec<ColumnSummary>), PipelineError> {
    let series = crate::observation::read_raw_csv(input)?;
    let scored = score(series, contamination, seed)?;
    write_scored_csv(output, &scored)?;
    Ok((LabelCounts::tally(&scored), describe(&scored)))
}
