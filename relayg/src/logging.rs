use anyhow::Result;
use tracing_subscriber::filter::EnvFilter;

/// Initialize the global subscriber. The filter comes from `RELAYG_LOG`
/// (default `info`); the mode picks the fmt flavor.
pub fn init(mode: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env("RELAYG_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    match mode {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow::anyhow!("init logging: {err}"))?,
        "pretty" => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow::anyhow!("init logging: {err}"))?,
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow::anyhow!("init logging: {err}"))?,
    }

    Ok(())
}
