use agent_client::{load_client_config, ClientConfig};

use crate::cli::Args;

pub(crate) fn resolve_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => load_client_config(path)?,
        None => ClientConfig::default(),
    };
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut ClientConfig, args: &Args) {
    if let Some(endpoint) = args.endpoint.as_ref() {
        config.endpoint = endpoint.clone();
    }
    if let Some(dir) = args.credentials_dir.as_ref() {
        config.credentials_dir = dir.clone();
    }
    if let Some(timeout) = args.timeout {
        config.command_timeout_ms = timeout.as_millis() as u64;
    }
}
