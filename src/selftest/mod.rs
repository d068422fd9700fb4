//! Detection-style self checks.
//!
//! A [`TestRunner`] holds named [`Probe`]s grouped by [`ProbeCategory`]. Each
//! probe inspects a profile the way a fingerprinting page would inspect the
//! spoofed browser and reports what it expected and what it saw. A probe
//! that errors or panics counts as a failure; the run always continues.
//!
//! ```rust
//! use ki_fingerprint::profile::FingerprintProfile;
//! use ki_fingerprint::selftest::{RunFilter, TestRunner};
//!
//! let mut runner = TestRunner::new();
//! runner.run_all(&FingerprintProfile::default(), &RunFilter::default());
//! let report = runner.generate_report();
//! assert_eq!(report.total, report.passed + report.failed);
//! ```

mod probes;
mod suites;

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::profile::FingerprintProfile;

pub use suites::Suite;

/// Probe body. Errors are reported as failures.
pub type ProbeFn = fn(&FingerprintProfile) -> anyhow::Result<ProbeOutcome>;

#[derive(Debug, Error)]
pub enum SelfTestError {
    #[error("Unknown probe category: {0}")]
    UnknownCategory(String),

    #[error("Unknown probe suite: {0}")]
    UnknownSuite(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeCategory {
    Navigator,
    Canvas,
    Webgl,
    Audio,
    Fonts,
    Screen,
    Timezone,
    Webrtc,
    Prototype,
    Function,
    General,
}

impl ProbeCategory {
    pub const ALL: &'static [ProbeCategory] = &[
        ProbeCategory::Navigator,
        ProbeCategory::Canvas,
        ProbeCategory::Webgl,
        ProbeCategory::Audio,
        ProbeCategory::Fonts,
        ProbeCategory::Screen,
        ProbeCategory::Timezone,
        ProbeCategory::Webrtc,
        ProbeCategory::Prototype,
        ProbeCategory::Function,
        ProbeCategory::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeCategory::Navigator => "navigator",
            ProbeCategory::Canvas => "canvas",
            ProbeCategory::Webgl => "webgl",
            ProbeCategory::Audio => "audio",
            ProbeCategory::Fonts => "fonts",
            ProbeCategory::Screen => "screen",
            ProbeCategory::Timezone => "timezone",
            ProbeCategory::Webrtc => "webrtc",
            ProbeCategory::Prototype => "prototype",
            ProbeCategory::Function => "function",
            ProbeCategory::General => "general",
        }
    }
}

impl fmt::Display for ProbeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeCategory {
    type Err = SelfTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        ProbeCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| SelfTestError::UnknownCategory(s.to_string()))
    }
}

/// What a probe observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub passed: bool,
    pub expected: Value,
    pub actual: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProbeOutcome {
    /// Passes when `actual` equals `expected`.
    pub fn compare(expected: impl Into<Value>, actual: impl Into<Value>) -> Self {
        let expected = expected.into();
        let actual = actual.into();
        Self {
            passed: expected == actual,
            expected,
            actual,
            details: None,
        }
    }

    pub fn check(passed: bool, expected: impl Into<Value>, actual: impl Into<Value>) -> Self {
        Self {
            passed,
            expected: expected.into(),
            actual: actual.into(),
            details: None,
        }
    }

    /// A pass for surfaces the profile leaves to the real browser.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            expected: Value::Null,
            actual: Value::Null,
            details: Some(reason.into()),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// A named check.
#[derive(Debug, Clone)]
pub struct Probe {
    pub name: String,
    pub category: ProbeCategory,
    pub run: ProbeFn,
}

impl Probe {
    pub fn new(name: impl Into<String>, category: ProbeCategory, run: ProbeFn) -> Self {
        Self {
            name: name.into(),
            category,
            run,
        }
    }
}

/// Restricts a run. Empty fields select everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFilter {
    pub categories: Option<Vec<ProbeCategory>>,
    pub test_names: Option<Vec<String>>,
}

impl RunFilter {
    pub fn categories(categories: impl IntoIterator<Item = ProbeCategory>) -> Self {
        Self {
            categories: Some(categories.into_iter().collect()),
            test_names: None,
        }
    }

    pub fn names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            categories: None,
            test_names: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    fn matches(&self, probe: &Probe) -> bool {
        let category_ok = self
            .categories
            .as_ref()
            .map_or(true, |c| c.contains(&probe.category));
        let name_ok = self
            .test_names
            .as_ref()
            .map_or(true, |n| n.iter().any(|name| *name == probe.name));
        category_ok && name_ok
    }
}

/// One executed probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub name: String,
    pub category: ProbeCategory,
    pub passed: bool,
    pub expected: Value,
    pub actual: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_us: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Aggregate of the last run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage in `0..=100`; `0` for an empty run.
    pub pass_rate: f64,
    pub categories: BTreeMap<ProbeCategory, CategorySummary>,
    pub failures: Vec<ProbeResult>,
    pub duration_ms: f64,
}

impl TestReport {
    pub fn category(&self, category: ProbeCategory) -> Option<&CategorySummary> {
        self.categories.get(&category)
    }

    /// Pass rate over the given categories only.
    pub fn pass_rate_for(&self, categories: &[ProbeCategory]) -> f64 {
        let (total, passed) = self
            .categories
            .iter()
            .filter(|(c, _)| categories.contains(c))
            .fold((0, 0), |(t, p), (_, s)| (t + s.total, p + s.passed));
        percentage(passed, total)
    }
}

fn percentage(passed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        passed as f64 * 100.0 / total as f64
    }
}

/// Probe registry and the results of its last run.
#[derive(Debug, Clone)]
pub struct TestRunner {
    probes: Vec<Probe>,
    results: Vec<ProbeResult>,
    elapsed: Duration,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    /// A runner with the built-in probes.
    pub fn new() -> Self {
        let mut runner = Self::empty();
        for probe in probes::builtin() {
            runner.register(probe);
        }
        runner
    }

    pub fn empty() -> Self {
        Self {
            probes: Vec::new(),
            results: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Adds a probe, replacing any probe with the same name.
    pub fn register(&mut self, probe: Probe) {
        match self.probes.iter_mut().find(|p| p.name == probe.name) {
            Some(existing) => *existing = probe,
            None => self.probes.push(probe),
        }
    }

    /// Adds every probe of a third-party-style suite.
    pub fn register_suite(&mut self, suite: Suite) -> usize {
        let probes = suite.probes();
        let count = probes.len();
        for probe in probes {
            self.register(probe);
        }
        debug!(suite = %suite, probes = count, "Registered probe suite");
        count
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name.as_str()).collect()
    }

    /// Results of the last [`run_all`](Self::run_all).
    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    /// Runs every probe selected by `filter` against `profile`.
    pub fn run_all(&mut self, profile: &FingerprintProfile, filter: &RunFilter) -> &[ProbeResult] {
        let started = Instant::now();
        let results: Vec<ProbeResult> = self
            .probes
            .iter()
            .filter(|p| filter.matches(p))
            .map(|p| run_probe(p, profile))
            .collect();
        self.elapsed = started.elapsed();

        let passed = results.iter().filter(|r| r.passed).count();
        info!(
            total = results.len(),
            passed,
            failed = results.len() - passed,
            "Self-test run finished"
        );
        self.results = results;
        &self.results
    }

    pub fn generate_report(&self) -> TestReport {
        let mut categories: BTreeMap<ProbeCategory, CategorySummary> = BTreeMap::new();
        for result in &self.results {
            let summary = categories.entry(result.category).or_default();
            summary.total += 1;
            if result.passed {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
        }

        let total = self.results.len();
        let passed = self.results.iter().filter(|r| r.passed).count();
        TestReport {
            total,
            passed,
            failed: total - passed,
            pass_rate: percentage(passed, total),
            categories,
            failures: self.results.iter().filter(|r| !r.passed).cloned().collect(),
            duration_ms: self.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

fn run_probe(probe: &Probe, profile: &FingerprintProfile) -> ProbeResult {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (probe.run)(profile)));
    let duration_us = started.elapsed().as_micros() as u64;

    let mut result = ProbeResult {
        name: probe.name.clone(),
        category: probe.category,
        passed: false,
        expected: Value::Null,
        actual: Value::Null,
        details: None,
        error: None,
        duration_us,
    };
    match outcome {
        Ok(Ok(outcome)) => {
            result.passed = outcome.passed;
            result.expected = outcome.expected;
            result.actual = outcome.actual;
            result.details = outcome.details;
        }
        Ok(Err(e)) => result.error = Some(format!("{:#}", e)),
        Err(payload) => result.error = Some(panic_message(payload.as_ref())),
    }
    if !result.passed {
        debug!(probe = %result.name, category = %result.category, error = ?result.error, "Probe failed");
    }
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::json;

    fn failing(_: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
        bail!("probe exploded")
    }

    fn panicking(_: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
        panic!("boom")
    }

    fn passing(_: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
        Ok(ProbeOutcome::compare(json!(1), json!(1)))
    }

    #[test]
    fn test_default_profile_passes_builtin_probes() {
        let mut runner = TestRunner::new();
        runner.run_all(&FingerprintProfile::default(), &RunFilter::default());
        let report = runner.generate_report();
        assert!(report.total > 20);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.pass_rate, 100.0);
        for category in ProbeCategory::ALL {
            assert!(report.category(*category).is_some(), "no probe for {}", category);
        }
    }

    #[test]
    fn test_errors_and_panics_are_failures() {
        let mut runner = TestRunner::empty();
        runner.register(Probe::new("ok", ProbeCategory::General, passing));
        runner.register(Probe::new("err", ProbeCategory::General, failing));
        runner.register(Probe::new("panic", ProbeCategory::Canvas, panicking));
        runner.run_all(&FingerprintProfile::default(), &RunFilter::default());

        let report = runner.generate_report();
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 1);
        assert!((report.pass_rate - 33.333).abs() < 0.01);
        assert_eq!(report.category(ProbeCategory::General).unwrap().failed, 1);

        let err = runner.results().iter().find(|r| r.name == "err").unwrap();
        assert_eq!(err.error.as_deref(), Some("probe exploded"));
        let panicked = runner.results().iter().find(|r| r.name == "panic").unwrap();
        assert_eq!(panicked.error.as_deref(), Some("panicked: boom"));
    }

    #[test]
    fn test_filters() {
        let mut runner = TestRunner::new();
        let results = runner.run_all(
            &FingerprintProfile::default(),
            &RunFilter::categories([ProbeCategory::Webgl]),
        );
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.category == ProbeCategory::Webgl));

        let results = runner.run_all(
            &FingerprintProfile::default(),
            &RunFilter::names(["webdriver_hidden"]),
        );
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_empty_run_report() {
        let runner = TestRunner::new();
        let report = runner.generate_report();
        assert_eq!(report.total, 0);
        assert_eq!(report.pass_rate, 0.0);
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut runner = TestRunner::empty();
        runner.register(Probe::new("x", ProbeCategory::General, failing));
        runner.register(Probe::new("x", ProbeCategory::General, passing));
        assert_eq!(runner.probes().len(), 1);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("WebGL".parse::<ProbeCategory>().unwrap(), ProbeCategory::Webgl);
        assert!("gpu".parse::<ProbeCategory>().is_err());
    }
}
