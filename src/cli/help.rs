//! CLI command-name contract for logging.

use crate::cli::parse::Commands;

/// Command name string recorded with each log line (e.g. "run", "schedule").
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Run { .. } => "run",
        Commands::Schedule { .. } => "schedule",
        Commands::Config { .. } => "config",
    }
}

/// Output format the command prints in; errors are rendered the same way.
pub fn output_format(command: &Commands) -> &str {
    match command {
        Commands::Run { format, .. } if format == "json" => "json",
        Commands::Config { format } if format == "json" => "json",
        _ => "text",
    }
}
