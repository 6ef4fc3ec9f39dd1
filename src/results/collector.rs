//! Real-time result collection while a run executes.
//!
//! Cases run concurrently across several devices, so results arrive out of
//! order and from different tasks. The collector is a cheap cloneable handle
//! over shared state; every task holds its own clone and records outcomes as
//! they happen, and the run driver calls [`RunCollector::finish`] once at the
//! end to produce the report.
//!
//! # Example
//!
//! ```
//! use rust_hil::results::{CaseRecord, RunCollector};
//!
//! # tokio_test::block_on(async {
//! let collector = RunCollector::new();
//!
//! // Each worker task holds its own clone.
//! let worker = collector.clone();
//! worker.record("wlan", CaseRecord::passed("scan")).await;
//! worker
//!     .record("wlan", CaseRecord::failed("associate", "beacon lost"))
//!     .await;
//!
//! let report = collector.finish().await;
//! assert_eq!(report.total_cases(), 2);
//! # });
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CaseRecord, RunReport, SuiteRecord};
use crate::error::HilError;

struct CollectorState {
    suites: Vec<SuiteRecord>,
    started_at: DateTime<Utc>,
    start_time: Instant,
}

/// Shared collector for gathering case records in real-time
#[derive(Clone)]
pub struct RunCollector {
    run_id: Uuid,
    state: Arc<RwLock<CollectorState>>,
}

impl RunCollector {
    /// Create a new collector for a fresh run
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: Arc::new(RwLock::new(CollectorState {
                suites: Vec::new(),
                started_at: Utc::now(),
                start_time: Instant::now(),
            })),
        }
    }

    /// Identifier of the run being collected
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Register a suite so it appears in the report even with zero cases
    pub async fn begin_suite(&self, name: &str) {
        let mut state = self.state.write().await;
        if !state.suites.iter().any(|s| s.name == name) {
            tracing::info!(run_id = %self.run_id, suite = name, "suite started");
            state.suites.push(SuiteRecord::new(name));
        }
    }

    /// Record a case outcome under the named suite
    pub async fn record(&self, suite: &str, case: CaseRecord) {
        match &case.category {
            Some(category) => tracing::warn!(
                run_id = %self.run_id,
                suite,
                case = %case.name,
                category = category.as_str(),
                detail = case.detail.as_deref().unwrap_or(""),
                "case failed"
            ),
            None => tracing::debug!(
                run_id = %self.run_id,
                suite,
                case = %case.name,
                status = case.status.as_str(),
                "case recorded"
            ),
        }

        let mut state = self.state.write().await;
        match state.suites.iter_mut().find(|s| s.name == suite) {
            Some(existing) => existing.add_case(case),
            None => {
                let mut record = SuiteRecord::new(suite);
                record.add_case(case);
                state.suites.push(record);
            }
        }
    }

    /// Record a failure directly from the error that caused it
    pub async fn record_error(&self, suite: &str, case: &str, error: &HilError) {
        self.record(suite, CaseRecord::from_error(case, error)).await;
    }

    /// Get suite record by name
    pub async fn suite(&self, name: &str) -> Option<SuiteRecord> {
        let state = self.state.read().await;
        state.suites.iter().find(|s| s.name == name).cloned()
    }

    /// Get total case count
    pub async fn total_cases(&self) -> usize {
        let state = self.state.read().await;
        state.suites.iter().map(|s| s.total_count()).sum()
    }

    /// Get passed case count
    pub async fn passed_cases(&self) -> usize {
        let state = self.state.read().await;
        state.suites.iter().map(|s| s.passed_count()).sum()
    }

    /// Get failed case count
    pub async fn failed_cases(&self) -> usize {
        let state = self.state.read().await;
        state.suites.iter().map(|s| s.failed_count()).sum()
    }

    /// Generate the final report and log its summary
    pub async fn finish(&self) -> RunReport {
        let mut state = self.state.write().await;

        for suite in state.suites.iter_mut() {
            suite.mark_completed();
        }

        let mut report = RunReport::new();
        report.run_id = self.run_id;
        report.started_at = state.started_at;
        report.finished_at = Utc::now();
        report.suites = state.suites.clone();

        let breakdown = report.failure_breakdown();
        let mut notes = format!(
            "Total Duration: {:.2}s\n",
            state.start_time.elapsed().as_secs_f64()
        );
        if !breakdown.is_empty() {
            notes.push_str("Failure Categories:\n");
            for (category, count) in &breakdown {
                notes.push_str(&format!("- {}: {}\n", category.as_str(), count));
            }
        }
        report = report.with_notes(notes);

        tracing::info!(run_id = %self.run_id, summary = %report.summary_line(), "run finished");
        report
    }
}

impl Default for RunCollector {
    fn default() -> Self {
        Self::new()
    }
}
