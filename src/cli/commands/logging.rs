//! Log verbosity for the authorizer.
//!
//! Denials are logged at `WARN` with the failing stage, so `-v` (or
//! `GATEKEEPER_LOG_LEVEL=warn`) is the lowest level that shows why a token
//! was rejected. Without it only errors reach the log.

use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names accepted by `GATEKEEPER_LOG_LEVEL`, indexed by verbosity count.
pub const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        let level = level.trim();
        if let Ok(count) = level.parse::<u8>() {
            return if usize::from(count) < LEVELS.len() {
                Ok(count)
            } else {
                Err(format!("log level must be 0-{}", LEVELS.len() - 1))
            };
        }

        LEVELS
            .iter()
            .position(|name| name.eq_ignore_ascii_case(level))
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("invalid log level, expected one of: {}", LEVELS.join(", ")))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity: -v shows denied tokens and their stage, -vv adds startup and cache refreshes")
            .long_help(format!(
                "Verbosity level, repeat -v or set GATEKEEPER_LOG_LEVEL to one of {}. RUST_LOG directives still apply on top.",
                LEVELS.join(", ")
            ))
            .env("GATEKEEPER_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
