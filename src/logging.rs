use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

/// Crate-specific filter; takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "MANGARCHIVE_LOG";

const DEFAULT_DIRECTIVES: &str = "info,hyper=warn,reqwest=warn";

pub fn init() -> anyhow::Result<()> {
    let filter = filter_from_env().context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}

fn filter_from_env() -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::try_new(directives),
        Err(_) => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVES)),
    }
}
