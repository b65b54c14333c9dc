//! Command-line interface for taskpool.
//!
//! Provides the `demo` command that exercises a pool with synthetic tasks,
//! plus the binary's log setup.

mod commands;
mod logging;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, DemoArgs};
pub use logging::{build_filter, filter_directives, init_logging};
