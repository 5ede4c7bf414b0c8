#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};

use slurmlink::cli::Cli;
use slurmlink::config;
use slurmlink::ssh_config;
use slurmlink::tunnel::auth::AuthMethod;
use slurmlink::tunnel::transport::RusshFactory;
use slurmlink::tunnel::{
    ConnectionManager, ConnectionProfile, DirectProfile, Orchestrator, TunnelSpec,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging with proper tracing default
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.parse().expect("valid directive")),
        )
        .init();

    let specs: Arc<[TunnelSpec]> = cli.tunnel_specs()?.into();
    let resolved = ssh_config::resolve_host(&cli.login_node)?;

    let auth = match &cli.identity {
        Some(path) => AuthMethod::Key(path.clone()),
        None => {
            if env::var_os("SSH_AUTH_SOCK").is_none() {
                warn!("SSH_AUTH_SOCK is not set; agent authentication will likely fail");
            }
            AuthMethod::Agent
        }
    };

    let profile = ConnectionProfile {
        host: Some(resolved.host.clone()),
        username: resolved.username,
        auth,
        keepalive: Duration::from_secs(config::resolve_keepalive_secs()),
    };

    let poll_interval = Duration::from_secs(config::resolve_poll_interval(cli.poll_interval));
    let base_delay = Duration::from_millis(config::resolve_base_delay_ms(cli.base_delay));
    let connect_timeout = Duration::from_secs(config::resolve_connect_timeout_secs());

    let factory = Arc::new(RusshFactory::new(connect_timeout));
    let manager = Arc::new(ConnectionManager::new(
        Box::new(DirectProfile::new(profile.clone())?),
        factory.clone(),
        base_delay,
    ));
    let orchestrator = Orchestrator::new(
        manager,
        factory,
        profile,
        Arc::clone(&specs),
        poll_interval,
        base_delay,
    );

    info!(
        login = %resolved.host,
        tunnels = specs.len(),
        poll = ?poll_interval,
        "starting"
    );

    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                orchestrator.close().await;
            }
        });
    }

    orchestrator.run().await;
    Ok(())
}
