//! TAP (Test Anything Protocol) harness for tests that must run on the node.
//!
//! Host unit tests use `#[test]`. Tests that exercise real peripherals (NVS,
//! UART, RTC) are written with `#[tap_test]` instead, collected with
//! `inventory` and run by the `device-tests` binary, which prints TAP on the
//! console so any TAP consumer can parse the result.
//!
//! Only compiled with the `tap-tests` feature.
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use xbee_sensor_node_macros::tap_test;
//!
//!     #[tap_test]
//!     fn table_wraps() {
//!         let mut table = WakeTable::new(vec![0, 5, 13]).unwrap();
//!         table.advance();
//!         table.advance();
//!         assert_eq!(table.index(), 0);
//!     }
//! }
//! ```

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};

// Re-export inventory for use by the proc-macro
pub use inventory;

/// Result type for test functions.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registers and runs one test on a runner.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A test collected by `#[tap_test]`.
pub struct TapTestEntry {
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

/// Registered tests whose name contains `filter` (all when empty).
pub fn matching_tests(filter: &str) -> Vec<&'static TapTestEntry> {
    inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(|entry| entry.name.contains(filter))
        .collect()
}

/// Run every registered test matching `filter`, printing TAP to stdout.
///
/// Returns true when all of them passed.
pub fn run_tests(filter: &str) -> bool {
    let tests = matching_tests(filter);
    let mut runner = TestRunner::new(Box::new(std::io::stdout()));
    runner.plan(tests.len());
    for entry in tests {
        (entry.register)(&mut runner);
    }
    runner.finish()
}

/// How a single test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// Returned an error.
    Failed(String),
    /// Panicked (or did not panic when it should have).
    Panicked(String),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Runs tests and writes TAP lines to a sink.
pub struct TestRunner {
    out: Box<dyn Write>,
    results: Vec<(String, Outcome)>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl TestRunner {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            out,
            results: Vec::new(),
        }
    }

    /// Runner that discards its output.
    pub fn silent() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    // A console that stops accepting output must not abort the test run.
    fn line(&mut self, text: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{}", text);
    }

    fn record(&mut self, name: &str, outcome: Outcome) {
        let number = self.results.len() + 1;
        match &outcome {
            Outcome::Passed => self.line(format_args!("ok {} - {}", number, name)),
            Outcome::Failed(e) => {
                self.line(format_args!("not ok {} - {}", number, name));
                self.line(format_args!("# Error: {}", e));
            }
            Outcome::Panicked(msg) => {
                self.line(format_args!("not ok {} - {}", number, name));
                self.line(format_args!("# Panic: {}", msg));
            }
        }
        if !outcome.is_pass() {
            log::warn!("Test {} failed", name);
        }
        self.results.push((name.to_string(), outcome));
    }

    /// Run a test returning [`TestResult`]; panics count as failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
        };
        self.record(name, outcome);
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, with a message containing `expected` if given.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Outcome::Panicked("expected panic but test completed normally".into()),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                match expected {
                    Some(want) if !msg.contains(want) => Outcome::Panicked(format!(
                        "expected panic containing '{}', got '{}'",
                        want, msg
                    )),
                    _ => Outcome::Passed,
                }
            }
        };
        self.record(name, outcome);
    }

    /// Print the TAP version and plan line.
    pub fn plan(&mut self, planned: usize) {
        self.line(format_args!("TAP version 14"));
        self.line(format_args!("1..{}", planned));
    }

    /// Print a diagnostic comment.
    pub fn comment(&mut self, msg: &str) {
        self.line(format_args!("# {}", msg));
    }

    /// Print the summary. Returns true if every test passed.
    pub fn finish(&mut self) -> bool {
        let total = self.results.len();
        let failed = self.failed().len();
        let passed = total - failed;
        self.line(format_args!("# Tests run: {}", total));
        self.line(format_args!("# Passed: {}", passed));
        self.line(format_args!("# Failed: {}", failed));
        let _ = self.out.flush();
        log::info!("TAP run finished: {} passed, {} failed", passed, failed);
        failed == 0
    }

    pub fn results(&self) -> &[(String, Outcome)] {
        &self.results
    }

    /// Names of the tests that did not pass.
    pub fn failed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, outcome)| !outcome.is_pass())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// The harness checks itself with its own tests.
mod tap_tests {
    use super::*;
    use xbee_sensor_node_macros::tap_test;

    #[tap_test]
    fn runner_records_outcomes_in_order() {
        let mut runner = TestRunner::silent();
        runner.run("pass", || Ok(()));
        runner.run("fail", || Err("bad reading".into()));
        runner.run_assert("panic", || panic!("boom"));
        assert_eq!(
            runner.results(),
            &[
                ("pass".to_string(), Outcome::Passed),
                ("fail".to_string(), Outcome::Failed("bad reading".into())),
                ("panic".to_string(), Outcome::Panicked("boom".into())),
            ]
        );
        assert_eq!(runner.failed(), vec!["fail", "panic"]);
        assert!(!runner.finish());
    }

    #[tap_test]
    fn should_panic_checks_message() {
        let mut runner = TestRunner::silent();
        runner.run_should_panic("any", || panic!("x"), None);
        runner.run_should_panic("match", || panic!("target exceeded"), Some("exceeded"));
        runner.run_should_panic("mismatch", || panic!("other"), Some("exceeded"));
        runner.run_should_panic("no panic", || {}, None);
        assert_eq!(runner.failed(), vec!["mismatch", "no panic"]);
    }

    #[tap_test]
    fn filter_selects_by_name() {
        assert!(matching_tests("no-test-has-this-name").is_empty());
        assert!(matching_tests("filter_selects_by_name")
            .iter()
            .any(|entry| entry.name == "filter_selects_by_name"));
    }
}
