//! Hub runtime binary: loads configuration, initializes tracing, parses any
//! startup agent seeds, and runs the WebSocket hub until killed.

mod log_format;
mod logging;

use clap::Parser;
use hub_core::model::AgentConfig;
use hub_server::{AgentSeed, HubConfig, NullScreencastSource};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "hub")]
#[command(about = "Runs the hub WebSocket server")]
struct Args {
    /// Bind address for the client protocol socket (overrides HUB_HOST)
    #[arg(long, value_name = "ADDR")]
    host: Option<IpAddr>,

    /// Bind port for the client protocol socket (overrides HUB_PORT)
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Bind port for the viewport streamer (overrides HUB_STREAM_PORT)
    #[arg(long, value_name = "PORT")]
    stream_port: Option<u16>,

    /// Directory for sandbox/session storage (overrides HUB_SANDBOX_PATH)
    #[arg(long, value_name = "DIR")]
    sandbox_path: Option<PathBuf>,

    /// YAML or JSON file listing agents to pre-register at startup
    #[arg(long, value_name = "PATH")]
    agents: Option<PathBuf>,
}

/// One entry of an `--agents` file: the subset of `AgentConfig` that makes
/// sense to configure from the outside, plus the id to register it under.
#[derive(serde::Deserialize)]
struct AgentSeedFile {
    id: String,
    model: String,
    provider: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    tool_catalog: Vec<String>,
}

fn load_agent_seeds(path: &std::path::Path) -> Result<Vec<AgentSeed>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<AgentSeedFile> = serde_yaml::from_str(&raw)?;
    Ok(entries
        .into_iter()
        .map(|e| AgentSeed {
            id: e.id,
            config: AgentConfig {
                model: e.model,
                provider: e.provider,
                system_prompt: e.system_prompt,
                tool_catalog: e.tool_catalog,
                token_budget: None,
                cost_budget: None,
                network_policy: Default::default(),
            },
        })
        .collect())
}

fn apply_overrides(mut config: HubConfig, args: &Args) -> HubConfig {
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(stream_port) = args.stream_port {
        config.stream_port = stream_port;
    }
    if let Some(ref dir) = args.sandbox_path {
        config.sandbox_path = dir.display().to_string();
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_and_apply("hub", None::<&std::path::Path>).ok();
    let _log_guard = logging::init()?;

    let args = Args::parse();
    let config = apply_overrides(HubConfig::from_env(), &args);

    let seeds = match &args.agents {
        Some(path) => load_agent_seeds(path)?,
        None => Vec::new(),
    };

    tracing::info!(host = %config.host, port = config.port, agents = seeds.len(), "starting hub");

    if let Err(err) = hub_server::run_serve(config, seeds, Arc::new(NullScreencastSource)).await {
        tracing::error!(%err, "hub exited with error");
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_specified_fields() {
        let base = HubConfig::from_env();
        let base_stream_port = base.stream_port;
        let args = Args {
            host: Some("0.0.0.0".parse().unwrap()),
            port: Some(9999),
            stream_port: None,
            sandbox_path: None,
            agents: None,
        };
        let applied = apply_overrides(base, &args);
        assert_eq!(applied.port, 9999);
        assert_eq!(applied.stream_port, base_stream_port);
    }

    #[test]
    fn agent_seed_file_parses_minimal_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(&path, "- id: a1\n  model: gpt\n  provider: openai\n").unwrap();
        let seeds = load_agent_seeds(&path).unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].id, "a1");
        assert_eq!(seeds[0].config.model, "gpt");
    }
}
