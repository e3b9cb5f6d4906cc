//! Suite runner
//!
//! A [`Suite`] is a named list of test functions. The [`Runner`] runs each
//! selected test as a harness case, honouring the gating, repetition and
//! profiling settings of the [`Config`], and collects a [`RunReport`].

use std::sync::Arc;

use log::{debug, info};

use crate::case::{CaseResult, TestContext, run_case};
use crate::config::Config;
use crate::report::{RunReport, SuiteReport};

bitflags::bitflags! {
    /// Settings a test needs enabled before it runs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Gate: u8 {
        /// Slow tests
        const EXPENSIVE              = 0b0000_0001;
        /// Tests of behaviour beyond the documented contract
        const IMPLEMENTATION_DETAILS = 0b0000_0010;
    }
}

impl Gate {
    /// Gates opened by `config`
    pub fn enabled_by(config: &Config) -> Gate {
        let mut gate = Gate::empty();
        gate.set(Gate::EXPENSIVE, config.expensive_tests);
        gate.set(Gate::IMPLEMENTATION_DETAILS, config.implementation_details);
        gate
    }
}

pub type TestFn = fn(&TestContext);

struct TestDef {
    name: &'static str,
    gate: Gate,
    body: TestFn,
}

/// Named collection of tests
pub struct Suite {
    name: &'static str,
    tests: Vec<TestDef>,
}

impl Suite {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tests: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add an ungated test
    pub fn test(self, name: &'static str, body: TestFn) -> Self {
        self.gated(name, Gate::empty(), body)
    }

    /// Add a test that only runs when every flag in `gate` is enabled
    pub fn gated(mut self, name: &'static str, gate: Gate, body: TestFn) -> Self {
        self.tests.push(TestDef { name, gate, body });
        self
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// `method(Suite)` ids of every test, in order
    pub fn test_ids(&self) -> Vec<String> {
        self.tests.iter().map(|t| test_id(self.name, t.name)).collect()
    }

    /// Run the tests `config` selects
    pub fn run(&self, config: &Arc<Config>) -> SuiteReport {
        let mut report = SuiteReport::new(self.name);
        let enabled = Gate::enabled_by(config);
        for test in &self.tests {
            let id = test_id(self.name, test.name);
            if !config.selects(&id) {
                continue;
            }
            let missing = test.gate.difference(enabled);
            if !missing.is_empty() {
                report.record_skip(&id, &format!("requires {:?}", missing));
                continue;
            }
            let result = run_test(&id, config, test.body);
            let millis = result.elapsed.as_millis() as u64;
            match result.failure {
                None => report.record_pass(&id, millis),
                Some(failure) => report.record_failure(&id, millis, failure),
            }
        }
        report
    }
}

fn test_id(suite: &str, method: &str) -> String {
    format!("{}({})", method, suite)
}

/// Run one test `runs_per_test` times, stopping at the first failure
fn run_test(id: &str, config: &Arc<Config>, body: TestFn) -> CaseResult {
    let mut total = std::time::Duration::ZERO;
    let mut last = None;
    for _ in 0..config.runs_per_test.max(1) {
        let result = if config.profile_tests {
            run_profiled(id, config, body)
        } else {
            run_case(id, config.clone(), body)
        };
        total += result.elapsed;
        let failed = !result.passed();
        last = Some(result);
        if failed {
            break;
        }
    }
    let mut result = last.unwrap_or_else(|| CaseResult {
        name: id.to_string(),
        elapsed: total,
        failure: None,
    });
    result.elapsed = total;
    result
}

/// Run a test, rerunning it once if it was slow
///
/// The first run of a slow test is treated as warm-up and never reported.
fn run_profiled(id: &str, config: &Arc<Config>, body: TestFn) -> CaseResult {
    let mut result = run_case(id, config.clone(), body);
    if result.passed() && result.elapsed >= config.profile_threshold {
        debug!("{}: slow first run, repeating after warm-up", id);
        result = run_case(id, config.clone(), body);
        if result.passed() && result.elapsed >= config.profile_threshold {
            info!("{}: {}", id, result.elapsed.as_millis());
        }
    }
    result
}

/// Runs suites and collects their reports
pub struct Runner {
    config: Arc<Config>,
    suites: Vec<Suite>,
}

impl Runner {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            suites: Vec::new(),
        }
    }

    pub fn suite(mut self, suite: Suite) -> Self {
        self.suites.push(suite);
        self
    }

    /// Run every suite `suite_runs` times
    pub fn run(&self) -> RunReport {
        let mut report = RunReport::new();
        let runs = self.config.suite_runs.max(1);
        for run in 0..runs {
            if runs > 1 {
                info!("suite run {}/{}", run + 1, runs);
            }
            for suite in &self.suites {
                report.add_suite(suite.run(&self.config));
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn noop(_: &TestContext) {}

    fn fails(ctx: &TestContext) {
        ctx.thread_fail("always fails");
    }

    #[test]
    fn test_gate_enabled_by_config() {
        let config = ConfigBuilder::new().expensive_tests(true).build().unwrap();
        assert_eq!(Gate::enabled_by(&config), Gate::EXPENSIVE);
        assert_eq!(Gate::enabled_by(&Config::default()), Gate::empty());
    }

    #[test]
    fn test_suite_ids() {
        let suite = Suite::new("DemoTest").test("test_one", noop).test("test_two", noop);
        assert_eq!(suite.test_ids(), vec!["test_one(DemoTest)", "test_two(DemoTest)"]);
        assert_eq!(suite.len(), 2);
    }

    #[test]
    fn test_repetitions_stop_at_first_failure() {
        let config = Arc::new(ConfigBuilder::new().runs_per_test(5).build().unwrap());
        let result = run_test("fails(DemoTest)", &config, fails);
        assert!(!result.passed());
    }
}
