// Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of worker threads, or "auto"
    #[serde(default = "default_workers")]
    pub workers: String,

    /// Regex applied to module.Class.test paths during discovery
    #[serde(default)]
    pub pattern: Option<String>,

    /// Stop dispatching after the first failure or error
    #[serde(default)]
    pub fail_fast: bool,

    /// Attach captured test output to terminal events
    #[serde(default = "default_capture")]
    pub capture_output: bool,

    /// Turn Ctrl-C into a graceful cancellation instead of dying immediately
    #[serde(default = "default_catch_interrupt")]
    pub catch_interrupt: bool,

    /// Seconds to keep draining events after an interrupt
    #[serde(default = "default_grace")]
    pub grace_period: u64,

    /// Test server profile to install
    #[serde(default = "default_server")]
    pub server: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            pattern: None,
            fail_fast: false,
            capture_output: default_capture(),
            catch_interrupt: default_catch_interrupt(),
            grace_period: default_grace(),
            server: default_server(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Reporter names to activate
    #[serde(default = "default_reporters")]
    pub reporters: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            reporters: default_reporters(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Tracing filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_workers() -> String {
    String::from("auto")
}

fn default_capture() -> bool {
    true
}

fn default_catch_interrupt() -> bool {
    true
}

fn default_grace() -> u64 {
    5
}

fn default_server() -> String {
    String::from("default")
}

fn default_reporters() -> Vec<String> {
    vec![String::from("console")]
}

fn default_log_level() -> String {
    String::from("warn")
}

impl Config {
    /// Load configuration from default locations
    pub fn load() -> Option<Self> {
        // Check locations in order:
        // 1. .eventestrc (current directory)
        // 2. ~/.eventestrc (home directory)
        // 3. .eventestrc.toml (current directory)
        // 4. ~/.eventestrc.toml (home directory)

        let cwd = std::env::current_dir().ok()?;
        let home = dirs::home_dir()?;

        let paths = [
            cwd.join(".eventestrc"),
            home.join(".eventestrc"),
            cwd.join(".eventestrc.toml"),
            home.join(".eventestrc.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        None
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Option<Self> {
        toml::from_str(content).ok()
    }

    /// Generate default configuration as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|_| String::new())
    }

    /// Worker count resolved to a number, `None` meaning auto-detect
    pub fn worker_count(&self) -> Option<usize> {
        match self.run.workers.as_str() {
            "auto" => None,
            n => n.parse().ok(),
        }
    }
}
