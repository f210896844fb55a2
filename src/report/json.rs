// JSON reporter - one JSON object per event, newline delimited

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::json;

use crate::event::{Event, Payload};

use super::Reporter;

/// Streams every event as a JSON line, to stdout or a file.
///
/// The emitted shape mirrors the wire frame plus the re-stamped timestamp,
/// so a run's output is replayable by any JSON-lines consumer.
pub struct JsonReporter {
    out: Box<dyn Write + Send>,
    path: Option<PathBuf>,
}

impl JsonReporter {
    pub fn stdout() -> Self {
        Self {
            out: Box::new(std::io::stdout()),
            path: None,
        }
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        Ok(Self {
            out: Box::new(BufWriter::new(file)),
            path: Some(path),
        })
    }

    /// Build from passthrough options (`--json-path events.jsonl`)
    pub fn from_options(options: &Payload) -> Result<Self> {
        match options.get("path").and_then(|v| v.as_str()) {
            Some(path) => Self::to_file(path),
            None => Ok(Self::stdout()),
        }
    }

    fn write_event(&mut self, event: &Event) {
        let line = json!({
            "event": event.name,
            "correlation_id": event.correlation_id,
            "timestamp": event.emitted_at.to_rfc3339(),
            "payload": event.payload,
        });
        if writeln!(self.out, "{line}").is_err() {
            tracing::warn!(
                "json reporter failed to write to {}",
                self.path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "stdout".to_string())
            );
        }
    }
}

impl Reporter for JsonReporter {
    fn name(&self) -> &str {
        "json"
    }

    // Every event, built-in or custom, becomes one line
    fn on_test_run_start(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_run_end(&mut self, event: &Event) {
        self.write_event(event);
        let _ = self.out.flush();
    }

    fn on_test_run_error(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_run_interrupted(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_start(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_end(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_setup(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_teardown(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_success(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_failure(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_error(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_test_skip(&mut self, event: &Event) {
        self.write_event(event);
    }

    fn on_custom_event(&mut self, event: &Event) {
        self.write_event(event);
    }
}
