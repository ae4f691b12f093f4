use crate::cli::{
    actions::{server::Args, Action},
    commands::{provider, ARG_DSN, ARG_PORT},
};
use anyhow::Result;
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .cloned()
        .map(SecretString::from);

    let provider = provider::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        provider,
    }))
}
