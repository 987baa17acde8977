//! CLI domain: parse, route, help, output, and presentation only.
//! No domain orchestration; single route table dispatches to the reconciler.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::{command_name, output_format};
pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{format_config, format_cycle_report_json, format_cycle_report_text};
pub use route::RunContext;
