//! Harness configuration
//!
//! Configuration is read once from the environment at suite start and then
//! shared read-only as `Arc<Config>`. Nothing in the harness mutates it
//! afterwards.

use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;

pub const DELAY_FACTOR_VAR: &str = "TCK_DELAY_FACTOR";
/// Fallback for the delay factor, honoured when `TCK_DELAY_FACTOR` is unset
pub const TIMEOUT_FACTOR_VAR: &str = "TEST_TIMEOUT_FACTOR";
pub const IMPLEMENTATION_DETAILS_VAR: &str = "TCK_IMPLEMENTATION_DETAILS";
pub const EXPENSIVE_TESTS_VAR: &str = "TCK_EXPENSIVE_TESTS";
pub const METHOD_FILTER_VAR: &str = "TCK_METHOD_FILTER";
pub const RUNS_PER_TEST_VAR: &str = "TCK_RUNS_PER_TEST";
pub const SUITE_RUNS_VAR: &str = "TCK_SUITE_RUNS";
pub const PROFILE_TESTS_VAR: &str = "TCK_PROFILE_TESTS";
pub const PROFILE_THRESHOLD_VAR: &str = "TCK_PROFILE_THRESHOLD_MS";

const DEFAULT_PROFILE_THRESHOLD_MS: u64 = 100;

/// Default delay factor
///
/// Interpreted execution is far slower than native, so delays are stretched
/// when running under Miri.
pub fn default_delay_factor() -> f32 {
    if cfg!(miri) { 4.0 } else { 1.0 }
}

/// Immutable harness configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub delay_factor: f32,
    /// Run tests that check behaviour beyond the documented contract
    pub implementation_details: bool,
    /// Run tests that take a long time
    pub expensive_tests: bool,
    /// Only run tests whose `method(Suite)` id matches
    pub method_filter: Option<Regex>,
    pub runs_per_test: u32,
    pub suite_runs: u32,
    pub profile_tests: bool,
    /// Tests slower than this are logged when profiling
    pub profile_threshold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delay_factor: default_delay_factor(),
            implementation_details: false,
            expensive_tests: false,
            method_filter: None,
            runs_per_test: 1,
            suite_runs: 1,
            profile_tests: false,
            profile_threshold: Duration::from_millis(DEFAULT_PROFILE_THRESHOLD_MS),
        }
    }
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`
    ///
    /// `lookup` maps a variable name to its value, `None` meaning unset.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut builder = ConfigBuilder::new();

        if let Some((name, value)) = get(DELAY_FACTOR_VAR)
            .map(|v| (DELAY_FACTOR_VAR, v))
            .or_else(|| get(TIMEOUT_FACTOR_VAR).map(|v| (TIMEOUT_FACTOR_VAR, v)))
        {
            let factor = value
                .trim()
                .parse::<f32>()
                .map_err(|_| ConfigError::InvalidFloat {
                    name: name.to_string(),
                    value: value.clone(),
                })?;
            builder = builder.delay_factor(factor);
        }

        builder = builder
            .implementation_details(get(IMPLEMENTATION_DETAILS_VAR).is_some_and(|v| parse_bool(&v)))
            .expensive_tests(get(EXPENSIVE_TESTS_VAR).is_some_and(|v| parse_bool(&v)))
            .profile_tests(get(PROFILE_TESTS_VAR).is_some_and(|v| parse_bool(&v)));

        if let Some(pattern) = get(METHOD_FILTER_VAR) {
            builder = builder.method_filter(&pattern)?;
        }
        if let Some(value) = get(RUNS_PER_TEST_VAR) {
            builder = builder.runs_per_test(parse_u32(RUNS_PER_TEST_VAR, &value)?);
        }
        if let Some(value) = get(SUITE_RUNS_VAR) {
            builder = builder.suite_runs(parse_u32(SUITE_RUNS_VAR, &value)?);
        }
        if let Some(value) = get(PROFILE_THRESHOLD_VAR) {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidInteger {
                    name: PROFILE_THRESHOLD_VAR.to_string(),
                    value: value.clone(),
                })?;
            builder = builder.profile_threshold(Duration::from_millis(millis));
        }

        builder.build()
    }

    /// Whether the test with this `method(Suite)` id should run
    pub fn selects(&self, id: &str) -> bool {
        self.method_filter.as_ref().is_none_or(|re| re.is_match(id))
    }
}

/// Booleans are true only for the word "true", in any case
fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn parse_u32(name: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidInteger {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Programmatic [`Config`] construction
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay_factor(mut self, factor: f32) -> Self {
        self.config.delay_factor = factor;
        self
    }

    pub fn implementation_details(mut self, enabled: bool) -> Self {
        self.config.implementation_details = enabled;
        self
    }

    pub fn expensive_tests(mut self, enabled: bool) -> Self {
        self.config.expensive_tests = enabled;
        self
    }

    pub fn method_filter(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let re = Regex::new(pattern).map_err(|source| ConfigError::InvalidFilter {
            pattern: pattern.to_string(),
            source,
        })?;
        self.config.method_filter = Some(re);
        Ok(self)
    }

    pub fn runs_per_test(mut self, runs: u32) -> Self {
        self.config.runs_per_test = runs;
        self
    }

    pub fn suite_runs(mut self, runs: u32) -> Self {
        self.config.suite_runs = runs;
        self
    }

    pub fn profile_tests(mut self, enabled: bool) -> Self {
        self.config.profile_tests = enabled;
        self
    }

    pub fn profile_threshold(mut self, threshold: Duration) -> Self {
        self.config.profile_threshold = threshold;
        self
    }

    /// Validate and finish
    pub fn build(self) -> Result<Config, ConfigError> {
        let factor = self.config.delay_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ConfigError::InvalidDelayFactor(factor));
        }
        Ok(self.config)
    }
}
