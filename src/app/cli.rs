//! Command-line interface definition.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "zephyr-engine",
    version,
    about = "Zephyr BMC polling and fan-control engine"
)]
pub struct Args {
    /// Path to the engine configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: String,

    /// Log level: trace, debug, info, warn, error, critical
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    pub check: bool,

    /// Run a single poll cycle for every server, then exit
    #[arg(long)]
    pub once: bool,

    /// Send a test notification to the given channel id, then exit
    #[arg(long, value_name = "CHANNEL_ID")]
    pub test_channel: Option<i64>,
}

/// Map a configured level name onto a tracing filter directive.
/// CRITICAL is handled as ERROR level, the most severe tracing knows.
pub fn filter_for_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "critical" => "error",
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        other => {
            eprintln!(
                "Invalid log level '{other}'. Using INFO. \
                 Valid levels: TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL"
            );
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_map_onto_tracing_filters() {
        assert_eq!(filter_for_level("critical"), "error");
        assert_eq!(filter_for_level("DEBUG"), "debug");
        assert_eq!(filter_for_level("bogus"), "info");
    }
}
