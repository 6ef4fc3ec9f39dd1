//! Test result collection and reporting for device test runs.
//!
//! This module records what happened during a run against lab hardware and
//! turns it into an artifact a human or a CI pipeline can consume. It
//! includes:
//!
//! - `CaseRecord`: the outcome of a single test case
//! - `SuiteRecord`: an ordered group of related cases
//! - `RunReport`: the complete run with host and timing metadata
//! - `RunCollector`: shared, task-safe collection while cases execute
//! - Failure categorization from [`HilError`] values, so a report can say
//!   "this run lost SSH" rather than burying it in free-form text

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppResult, HilError};

pub mod collector;

pub use collector::RunCollector;

/// Case execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    /// Case passed
    Passed,
    /// Case ran and failed its own checks or command
    Failed,
    /// Case was skipped
    Skipped,
    /// Case was killed by its wall-clock limit
    Timeout,
    /// Infrastructure failed before or during the case
    Error,
}

impl CaseStatus {
    /// Check if status indicates success
    pub fn is_passed(&self) -> bool {
        matches!(self, CaseStatus::Passed)
    }

    /// Check if status counts against the pass rate
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CaseStatus::Failed | CaseStatus::Timeout | CaseStatus::Error
        )
    }

    /// Get human-readable status string
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Passed => "PASSED",
            CaseStatus::Failed => "FAILED",
            CaseStatus::Skipped => "SKIPPED",
            CaseStatus::Timeout => "TIMEOUT",
            CaseStatus::Error => "ERROR",
        }
    }
}

/// Failure classification for run-level triage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    /// SSH transport failure reaching a device
    Ssh,
    /// A command exceeded its wall-clock limit
    Timeout,
    /// A command ran but exited non-zero
    CommandFailed,
    /// A process could not be started at all
    Spawn,
    /// Controller setup or teardown failure
    Controller,
    /// On-device agent never became ready
    Agent,
    /// Configuration problem
    Config,
    /// Local I/O failure
    Io,
    /// Anything else
    Other,
}

impl FailureCategory {
    /// Classify a framework error into a triage bucket.
    pub fn from_error(error: &HilError) -> Self {
        match error {
            HilError::Ssh(_) => FailureCategory::Ssh,
            HilError::CommandTimeout(_) => FailureCategory::Timeout,
            HilError::CommandFailed(_) => FailureCategory::CommandFailed,
            HilError::Spawn { .. } => FailureCategory::Spawn,
            HilError::Controller(_) | HilError::ShutdownFailed(_) => FailureCategory::Controller,
            HilError::Agent(_) => FailureCategory::Agent,
            HilError::Config(_) | HilError::Configuration(_) => FailureCategory::Config,
            HilError::Io(_) => FailureCategory::Io,
            HilError::StdinUnavailable
            | HilError::TaskFailure(_)
            | HilError::Serialization(_) => FailureCategory::Other,
        }
    }

    /// Category label used in report notes and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Ssh => "SSH",
            FailureCategory::Timeout => "TIMEOUT",
            FailureCategory::CommandFailed => "COMMAND_FAILED",
            FailureCategory::Spawn => "SPAWN",
            FailureCategory::Controller => "CONTROLLER",
            FailureCategory::Agent => "AGENT",
            FailureCategory::Config => "CONFIG",
            FailureCategory::Io => "IO",
            FailureCategory::Other => "OTHER",
        }
    }
}

/// Outcome of a single test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Unique identifier for this execution of the case
    pub id: Uuid,
    /// Case name for display
    pub name: String,
    /// Case execution status
    pub status: CaseStatus,
    /// Failure classification, when the case did not pass
    pub category: Option<FailureCategory>,
    /// Error message or skip reason
    pub detail: Option<String>,
    /// Captured command output worth keeping with the record
    pub output: Option<String>,
    /// Custom numeric metrics as key-value pairs
    pub metrics: HashMap<String, f64>,
    /// Case execution start time
    pub started_at: DateTime<Utc>,
    /// Total execution duration
    pub duration: Duration,
}

impl CaseRecord {
    fn base(name: String, status: CaseStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status,
            category: None,
            detail: None,
            output: None,
            metrics: HashMap::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Record a passing case.
    pub fn passed(name: impl Into<String>) -> Self {
        Self::base(name.into(), CaseStatus::Passed)
    }

    /// Record a failing case with a free-form detail message.
    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut case = Self::base(name.into(), CaseStatus::Failed);
        case.category = Some(FailureCategory::Other);
        case.detail = Some(detail.into());
        case
    }

    /// Record a skipped case with the reason it was skipped.
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut case = Self::base(name.into(), CaseStatus::Skipped);
        case.detail = Some(reason.into());
        case
    }

    /// Record a failing case directly from the error that sank it.
    ///
    /// Timeouts and infrastructure failures get their own statuses so a
    /// report distinguishes "the case failed" from "the lab broke"; the
    /// error is also categorized so failures can be grouped by cause.
    pub fn from_error(name: impl Into<String>, error: &HilError) -> Self {
        let status = match error {
            HilError::CommandTimeout(_) => CaseStatus::Timeout,
            HilError::CommandFailed(_) => CaseStatus::Failed,
            _ => CaseStatus::Error,
        };
        let mut case = Self::base(name.into(), status);
        case.category = Some(FailureCategory::from_error(error));
        case.detail = Some(error.to_string());
        case
    }

    /// Set the execution duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the start time
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Attach captured output
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Add a custom metric
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// Aggregated case records for one suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteRecord {
    /// Suite name
    pub name: String,
    /// All case records in execution order
    pub cases: Vec<CaseRecord>,
    /// Suite start time
    pub started_at: DateTime<Utc>,
    /// Suite end time
    pub ended_at: DateTime<Utc>,
}

impl SuiteRecord {
    /// Create a new suite record
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            cases: Vec::new(),
            started_at: now,
            ended_at: now,
        }
    }

    /// Add a case record
    pub fn add_case(&mut self, case: CaseRecord) {
        self.cases.push(case);
    }

    /// Get total number of cases
    pub fn total_count(&self) -> usize {
        self.cases.len()
    }

    /// Get number of passed cases
    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.status.is_passed()).count()
    }

    /// Get number of failed cases
    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.status.is_failure()).count()
    }

    /// Get number of skipped cases
    pub fn skipped_count(&self) -> usize {
        self.cases
            .iter()
            .filter(|c| c.status == CaseStatus::Skipped)
            .count()
    }

    /// Get pass rate as percentage, with skipped cases excluded
    pub fn pass_rate(&self) -> f64 {
        let executed = self.total_count() - self.skipped_count();
        if executed == 0 {
            return 100.0;
        }
        (self.passed_count() as f64 / executed as f64) * 100.0
    }

    /// Get total duration
    pub fn total_duration(&self) -> Duration {
        self.cases.iter().map(|c| c.duration).sum()
    }

    /// Get failed cases with detailed information
    pub fn failures(&self) -> Vec<&CaseRecord> {
        self.cases.iter().filter(|c| c.status.is_failure()).collect()
    }

    /// Mark suite as completed
    pub fn mark_completed(&mut self) {
        self.ended_at = Utc::now();
    }
}

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier for this run
    pub run_id: Uuid,
    /// Hostname of the machine driving the run
    pub host: String,
    /// Run start time
    pub started_at: DateTime<Utc>,
    /// Run end time
    pub finished_at: DateTime<Utc>,
    /// All suites in execution order
    pub suites: Vec<SuiteRecord>,
    /// Report notes
    pub notes: Option<String>,
}

impl RunReport {
    /// Create a new run report
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            host: local_hostname(),
            started_at: now,
            finished_at: now,
            suites: Vec::new(),
            notes: None,
        }
    }

    /// Add a suite record
    pub fn add_suite(&mut self, suite: SuiteRecord) {
        self.suites.push(suite);
    }

    /// Get total number of cases
    pub fn total_cases(&self) -> usize {
        self.suites.iter().map(|s| s.total_count()).sum()
    }

    /// Get total passed cases
    pub fn total_passed(&self) -> usize {
        self.suites.iter().map(|s| s.passed_count()).sum()
    }

    /// Get total failed cases
    pub fn total_failed(&self) -> usize {
        self.suites.iter().map(|s| s.failed_count()).sum()
    }

    /// Get total skipped cases
    pub fn total_skipped(&self) -> usize {
        self.suites.iter().map(|s| s.skipped_count()).sum()
    }

    /// Get overall pass rate, with skipped cases excluded
    pub fn overall_pass_rate(&self) -> f64 {
        let executed = self.total_cases() - self.total_skipped();
        if executed == 0 {
            return 100.0;
        }
        (self.total_passed() as f64 / executed as f64) * 100.0
    }

    /// Get all failures across all suites
    pub fn all_failures(&self) -> Vec<(String, CaseRecord)> {
        let mut failures = Vec::new();
        for suite in &self.suites {
            for failure in suite.failures() {
                failures.push((suite.name.clone(), failure.clone()));
            }
        }
        failures
    }

    /// Count failures per category across all suites
    pub fn failure_breakdown(&self) -> Vec<(FailureCategory, usize)> {
        let mut counts: Vec<(FailureCategory, usize)> = Vec::new();
        for suite in &self.suites {
            for case in suite.failures() {
                let category = case.category.unwrap_or(FailureCategory::Other);
                match counts.iter_mut().find(|(c, _)| *c == category) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((category, 1)),
                }
            }
        }
        counts
    }

    /// Add report notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// One-line summary suitable for a log message
    pub fn summary_line(&self) -> String {
        format!(
            "{} cases: {} passed, {} failed, {} skipped ({:.1}% pass rate)",
            self.total_cases(),
            self.total_passed(),
            self.total_failed(),
            self.total_skipped(),
            self.overall_pass_rate()
        )
    }

    /// Export report as pretty-printed JSON
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON report to a file
    pub async fn write_json(&self, path: &Path) -> AppResult<()> {
        let json = self.to_json()?;
        tokio::fs::write(path, json).await?;
        tracing::info!(path = %path.display(), "wrote run report");
        Ok(())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_record_creation() {
        let case = CaseRecord::passed("wlan_scan_finds_known_ssid");
        assert_eq!(case.name, "wlan_scan_finds_known_ssid");
        assert!(case.status.is_passed());
        assert!(case.category.is_none());
    }

    #[test]
    fn test_failure_categorization_from_error() {
        let err = HilError::Ssh(crate::ssh::SshError::PermissionDenied);
        let case = CaseRecord::from_error("reboot_dut", &err);

        assert!(case.status.is_failure());
        // Transport loss is the lab breaking, not the case failing.
        assert_eq!(case.status, CaseStatus::Error);
        assert_eq!(case.category, Some(FailureCategory::Ssh));
        assert!(case.detail.unwrap().contains("permission denied"));
    }

    #[test]
    fn test_from_error_status_mapping() {
        let output = crate::job::JobOutput {
            command: "iperf3 -c host".to_string(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: Some(1),
            signal: None,
            timed_out: false,
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::ZERO,
        };

        let failed = HilError::CommandFailed(Box::new(output.clone()));
        assert_eq!(
            CaseRecord::from_error("throughput", &failed).status,
            CaseStatus::Failed
        );

        let mut timed_out = output;
        timed_out.timed_out = true;
        let timeout = HilError::CommandTimeout(Box::new(timed_out));
        assert_eq!(
            CaseRecord::from_error("throughput", &timeout).status,
            CaseStatus::Timeout
        );
    }

    #[test]
    fn test_metrics_and_output_attach() {
        let case = CaseRecord::passed("iperf_downlink")
            .with_metric("throughput_mbps", 512.4)
            .with_metric("retransmits", 3.0)
            .with_output("[SUM] 0.00-10.00 sec 512 Mbits/sec");

        assert_eq!(case.metrics.len(), 2);
        assert_eq!(case.metrics["throughput_mbps"], 512.4);
        assert!(case.output.unwrap().contains("Mbits"));
    }

    #[test]
    fn test_suite_statistics() {
        let mut suite = SuiteRecord::new("wlan");
        for i in 0..8 {
            suite.add_case(CaseRecord::passed(format!("case_{i}")));
        }
        suite.add_case(CaseRecord::failed("case_8", "association timed out"));
        suite.add_case(CaseRecord::skipped("case_9", "requires 6 GHz AP"));

        assert_eq!(suite.total_count(), 10);
        assert_eq!(suite.passed_count(), 8);
        assert_eq!(suite.failed_count(), 1);
        assert_eq!(suite.skipped_count(), 1);
        assert!((suite.pass_rate() - 88.888).abs() < 0.01);
    }

    #[test]
    fn test_report_counts_and_breakdown() {
        let mut report = RunReport::new();

        let mut wlan = SuiteRecord::new("wlan");
        wlan.add_case(CaseRecord::passed("scan"));
        let timeout_err = HilError::CommandTimeout(Box::new(crate::job::JobOutput {
            command: "iperf3 -c host".to_string(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            signal: Some(9),
            timed_out: true,
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_secs(60),
        }));
        wlan.add_case(CaseRecord::from_error("throughput", &timeout_err));
        report.add_suite(wlan);

        assert_eq!(report.total_cases(), 2);
        assert_eq!(report.total_passed(), 1);
        assert_eq!(report.total_failed(), 1);
        assert_eq!(report.overall_pass_rate(), 50.0);
        assert_eq!(
            report.failure_breakdown(),
            vec![(FailureCategory::Timeout, 1)]
        );
        assert!(report.summary_line().contains("1 failed"));
    }

    #[test]
    fn test_json_export() {
        let mut report = RunReport::new();
        let mut suite = SuiteRecord::new("bt");
        suite.add_case(CaseRecord::passed("pairing"));
        report.add_suite(suite);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"run_id\""));
        assert!(json.contains("\"pairing\""));
        assert!(json.contains("\"PASSED\""));
    }
}
