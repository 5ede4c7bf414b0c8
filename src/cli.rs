//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::tunnel::error::TunnelError;
use crate::tunnel::profile::TunnelSpec;

/// Keep TCP tunnels alive between this machine and the compute nodes of your
/// running Slurm jobs, reachable only through a login host.
#[derive(Parser, Debug)]
#[command(name = "slurmlink", version, about)]
pub struct Cli {
    /// Login host to connect through; resolved against ~/.ssh/config.
    #[arg(short = 'l', long)]
    pub login_node: String,

    /// Tunnel as REMOTE->LOCAL (e.g. 8888->9999), or a single port used on
    /// both sides. Repeatable.
    #[arg(short = 't', long = "tunnel", required = true)]
    pub tunnels: Vec<String>,

    /// Private key file; defaults to the ssh-agent when omitted.
    #[arg(short = 'i', long)]
    pub identity: Option<PathBuf>,

    /// Seconds between node discovery polls.
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// First reconnect delay in milliseconds; later attempts double it.
    #[arg(long)]
    pub base_delay: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Parse every `--tunnel` argument into a [`TunnelSpec`].
    pub fn tunnel_specs(&self) -> Result<Vec<TunnelSpec>, TunnelError> {
        self.tunnels.iter().map(|raw| parse_tunnel(raw)).collect()
    }
}

fn parse_tunnel(raw: &str) -> Result<TunnelSpec, TunnelError> {
    let (remote, local) = match raw.split_once("->") {
        Some((remote, local)) => (remote.trim(), local.trim()),
        None => (raw.trim(), raw.trim()),
    };
    let remote: u16 = remote.parse().map_err(|_| {
        TunnelError::Configuration(format!("invalid remote port in tunnel '{raw}'"))
    })?;
    let local: u16 = local.parse().map_err(|_| {
        TunnelError::Configuration(format!("invalid local port in tunnel '{raw}'"))
    })?;
    TunnelSpec::new(remote, local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_to_local() {
        let spec = parse_tunnel("8888->9999").expect("valid tunnel");
        assert_eq!(spec.remote_port, 8888);
        assert_eq!(spec.local_port, 9999);
    }

    #[test]
    fn test_parse_single_port_mirrors_both_sides() {
        let spec = parse_tunnel("6006").expect("valid tunnel");
        assert_eq!(spec.remote_port, 6006);
        assert_eq!(spec.local_port, 6006);
    }

    #[test]
    fn test_parse_tolerates_spaces() {
        let spec = parse_tunnel("8888 -> 9999").expect("valid tunnel");
        assert_eq!(spec.remote_port, 8888);
        assert_eq!(spec.local_port, 9999);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_tunnel("eight->nine").is_err());
        assert!(parse_tunnel("8888->").is_err());
        assert!(parse_tunnel("").is_err());
    }

    #[test]
    fn test_parse_rejects_zero_port() {
        assert!(parse_tunnel("0->9999").is_err());
        assert!(parse_tunnel("8888->0").is_err());
    }

    #[test]
    fn test_cli_collects_repeated_tunnels() {
        let cli = Cli::parse_from([
            "slurmlink",
            "--login-node",
            "cluster",
            "--tunnel",
            "8888->9999",
            "--tunnel",
            "6006",
        ]);
        let specs = cli.tunnel_specs().expect("valid tunnels");
        assert_eq!(
            specs,
            vec![
                TunnelSpec::new(8888, 9999).expect("valid spec"),
                TunnelSpec::new(6006, 6006).expect("valid spec"),
            ]
        );
    }

    #[test]
    fn test_cli_requires_login_node_and_tunnel() {
        assert!(Cli::try_parse_from(["slurmlink"]).is_err());
        assert!(Cli::try_parse_from(["slurmlink", "--login-node", "cluster"]).is_err());
    }
}
