// CLI argument definitions using Clap

use clap::Parser;
use std::path::PathBuf;

/// Event-driven test runner
#[derive(Parser, Debug, Default)]
#[command(name = "eventest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run registered test suites across parallel workers", long_about = None)]
pub struct Cli {
    /// Only run tests whose module.Class.test path matches this regex
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Number of worker threads (default: auto-detect)
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Stop dispatching new tests after the first failure or error
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Print captured test output immediately instead of attaching it to events
    #[arg(long, default_value_t = false)]
    pub no_capture: bool,

    /// Let Ctrl-C kill the process immediately instead of draining gracefully
    #[arg(long, default_value_t = false)]
    pub no_catch_interrupt: bool,

    /// Reporters to activate (comma separated)
    #[arg(short, long, value_delimiter = ',', value_name = "NAMES")]
    pub reporters: Vec<String>,

    /// Test server profile to install
    #[arg(short, long, value_name = "NAME")]
    pub server: Option<String>,

    /// Seconds to keep draining events after Ctrl-C
    #[arg(long, value_name = "SECONDS")]
    pub grace_period: Option<u64>,

    /// Path to a configuration file (overrides the .eventestrc lookup)
    #[arg(long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Log filter directive
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Reporter-specific options as `--<reporter>-<option> <value>` pairs,
    /// e.g. `--console-verbose true --json-path events.jsonl`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "OPTIONS")]
    pub reporter_options: Vec<String>,
}
