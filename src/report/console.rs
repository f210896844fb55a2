// Console reporter - unittest-style terminal output

use std::io::Write;

use crate::event::{Event, Payload};

use super::Reporter;

/// How much the console reporter prints per test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// One character per test, summary at the end
    Dots,
    /// One line per test
    Verbose,
}

/// Built-in terminal reporter.
///
/// Dots mode prints `.` / `F` / `E` / `s` per unit; verbose mode prints a
/// line per unit with the failure detail inline. Both print a final summary
/// from the run-end totals.
pub struct ConsoleReporter {
    verbosity: Verbosity,
    dots_on_line: usize,
    failures: Vec<String>,
}

impl ConsoleReporter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            dots_on_line: 0,
            failures: Vec::new(),
        }
    }

    /// Build from passthrough options (`--console-verbose true`)
    pub fn from_options(options: &Payload) -> Self {
        let verbose = options
            .get("verbose")
            .and_then(|v| v.as_str())
            .is_some_and(|v| v == "true" || v == "1");
        Self::new(if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Dots
        })
    }

    fn mark(&mut self, glyph: char) {
        match self.verbosity {
            Verbosity::Dots => {
                print!("{glyph}");
                let _ = std::io::stdout().flush();
                self.dots_on_line += 1;
                if self.dots_on_line >= 80 {
                    println!();
                    self.dots_on_line = 0;
                }
            }
            Verbosity::Verbose => {}
        }
    }

    fn line(&self, event: &Event, outcome: &str, detail: Option<&str>) {
        if self.verbosity == Verbosity::Verbose {
            let test = event.get_str("test_name").unwrap_or("<unknown>");
            let class = event.get_str("class_name").unwrap_or("<unknown>");
            match detail {
                Some(d) => println!("{class}.{test} ... {outcome}: {d}"),
                None => println!("{class}.{test} ... {outcome}"),
            }
        }
    }

    fn remember(&mut self, event: &Event, label: &str, key: &str) {
        let test = event.get_str("test_name").unwrap_or("<unknown>");
        let class = event.get_str("class_name").unwrap_or("<unknown>");
        let detail = event.get_str(key).unwrap_or("<no detail>");
        self.failures.push(format!("{label} {class}.{test}: {detail}"));
    }
}

impl Reporter for ConsoleReporter {
    fn name(&self) -> &str {
        "console"
    }

    fn on_test_run_start(&mut self, event: &Event) {
        let total = event.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
        println!("running {total} test(s)");
    }

    fn on_test_success(&mut self, event: &Event) {
        self.mark('.');
        self.line(event, "ok", None);
    }

    fn on_test_failure(&mut self, event: &Event) {
        self.mark('F');
        self.line(event, "FAILED", event.get_str("failure"));
        self.remember(event, "FAIL", "failure");
    }

    fn on_test_error(&mut self, event: &Event) {
        self.mark('E');
        self.line(event, "ERROR", event.get_str("error"));
        self.remember(event, "ERROR", "error");
    }

    fn on_test_skip(&mut self, event: &Event) {
        self.mark('s');
        self.line(event, "skipped", event.get_str("reason"));
    }

    fn on_test_run_error(&mut self, event: &Event) {
        if event.get_str("test_name").is_some() {
            self.remember(event, "RUN ERROR", "error");
        } else {
            self.failures.push(format!(
                "RUN ERROR: {}",
                event.get_str("error").unwrap_or("<no detail>")
            ));
        }
    }

    fn on_test_run_interrupted(&mut self, event: &Event) {
        if self.dots_on_line > 0 {
            println!();
            self.dots_on_line = 0;
        }
        println!(
            "run interrupted: {}",
            event.get_str("reason").unwrap_or("cancelled")
        );
    }

    fn on_test_run_end(&mut self, event: &Event) {
        if self.dots_on_line > 0 {
            println!();
            self.dots_on_line = 0;
        }

        if !self.failures.is_empty() {
            println!();
            for failure in &self.failures {
                println!("{failure}");
            }
        }

        let count = |key: &str| event.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        let (passed, failed, errored, skipped) = (
            count("passed"),
            count("failed"),
            count("errored"),
            count("skipped"),
        );
        let verdict = if failed + errored > 0 { "FAILED" } else { "ok" };
        println!();
        println!(
            "{verdict} - {passed} passed, {failed} failed, {errored} errored, {skipped} skipped"
        );
    }
}
