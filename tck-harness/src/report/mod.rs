//! Test run reports
//!
//! Results are collected per suite and summarised per run. Reports can be
//! rendered for humans through `Display` or dumped as JSON.

use core::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// Test status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Individual test result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// `method(Suite)` id
    pub id: String,
    pub status: TestStatus,
    pub execution_time_ms: u64,
    pub failure: Option<Failure>,
    /// Why the test was skipped
    pub skip_reason: Option<String>,
}

/// Results of one suite
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub execution_time_ms: u64,
    pub results: Vec<TestResult>,
}

impl SuiteReport {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            ..Self::default()
        }
    }

    pub fn record_pass(&mut self, id: &str, execution_time_ms: u64) {
        self.push(TestResult {
            id: id.to_string(),
            status: TestStatus::Passed,
            execution_time_ms,
            failure: None,
            skip_reason: None,
        });
    }

    pub fn record_failure(&mut self, id: &str, execution_time_ms: u64, failure: Failure) {
        self.push(TestResult {
            id: id.to_string(),
            status: TestStatus::Failed,
            execution_time_ms,
            failure: Some(failure),
            skip_reason: None,
        });
    }

    pub fn record_skip(&mut self, id: &str, reason: &str) {
        self.push(TestResult {
            id: id.to_string(),
            status: TestStatus::Skipped,
            execution_time_ms: 0,
            failure: None,
            skip_reason: Some(reason.to_string()),
        });
    }

    fn push(&mut self, result: TestResult) {
        self.total += 1;
        match result.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
        self.execution_time_ms += result.execution_time_ms;
        self.results.push(result);
    }

    /// Percentage of run (non-skipped) tests that passed
    pub fn pass_rate(&self) -> f64 {
        let run = self.passed + self.failed;
        if run == 0 {
            100.0
        } else {
            self.passed as f64 / run as f64 * 100.0
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Fold another report of the same suite into this one
    pub fn merge(&mut self, other: &SuiteReport) {
        for result in &other.results {
            self.push(result.clone());
        }
    }
}

/// Totals over a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pass_rate: f64,
    pub execution_time_ms: u64,
}

/// Results of one runner invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub suites: Vec<SuiteReport>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a suite's results, merging with an earlier run of the same suite
    pub fn add_suite(&mut self, report: SuiteReport) {
        match self.suites.iter_mut().find(|s| s.suite == report.suite) {
            Some(existing) => existing.merge(&report),
            None => self.suites.push(report),
        }
    }

    pub fn summary(&self) -> TestSummary {
        let mut summary = TestSummary::default();
        for suite in &self.suites {
            summary.total += suite.total;
            summary.passed += suite.passed;
            summary.failed += suite.failed;
            summary.skipped += suite.skipped;
            summary.execution_time_ms += suite.execution_time_ms;
        }
        let run = summary.passed + summary.failed;
        summary.pass_rate = if run == 0 {
            100.0
        } else {
            summary.passed as f64 / run as f64 * 100.0
        };
        summary
    }

    pub fn all_passed(&self) -> bool {
        self.suites.iter().all(SuiteReport::all_passed)
    }

    /// Ids of failed tests, grouped by suite
    pub fn failures_by_suite(&self) -> HashMap<String, Vec<String>> {
        let mut failures: HashMap<String, Vec<String>> = HashMap::new();
        for suite in &self.suites {
            for result in suite.results.iter().filter(|r| r.status == TestStatus::Failed) {
                failures
                    .entry(suite.suite.clone())
                    .or_default()
                    .push(result.id.clone());
            }
        }
        failures
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for suite in &self.suites {
            writeln!(
                f,
                "{}: {} passed, {} failed, {} skipped ({}ms)",
                suite.suite, suite.passed, suite.failed, suite.skipped, suite.execution_time_ms
            )?;
            for result in suite.results.iter().filter(|r| r.status == TestStatus::Failed) {
                writeln!(f, "  FAILED {}", result.id)?;
                if let Some(failure) = &result.failure {
                    for line in failure.to_string().lines() {
                        writeln!(f, "    {}", line)?;
                    }
                }
            }
        }
        let summary = self.summary();
        write!(
            f,
            "total: {}, passed: {} ({:.1}%), failed: {}, skipped: {}, time: {}ms",
            summary.total,
            summary.passed,
            summary.pass_rate,
            summary.failed,
            summary.skipped,
            summary.execution_time_ms
        )
    }
}
