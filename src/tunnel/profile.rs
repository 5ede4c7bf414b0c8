//! Connection profiles and tunnel specifications.

use std::time::Duration;

use crate::tunnel::auth::AuthMethod;
use crate::tunnel::error::TunnelError;

/// Everything needed for one connection attempt.
///
/// A profile is rebuilt by the owning manager's strategy on every attempt and
/// never mutated afterwards. Direct connections carry a host; chained
/// connections drop it and ride on a pre-opened jump channel supplied next to
/// the profile (a byte stream is not `Clone`, so it travels separately).
#[derive(Clone, Debug)]
pub struct ConnectionProfile {
    /// Login-host address. `None` for chained connections.
    pub host: Option<String>,
    pub username: String,
    /// Credential handle; authentication itself is delegated to it.
    pub auth: AuthMethod,
    /// Transport keepalive, so dead sessions are noticed and reconnected.
    pub keepalive: Duration,
}

/// One remote-port → local-port forwarding pair.
///
/// Supplied once at startup and shared read-only across all node agents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TunnelSpec {
    pub remote_port: u16,
    pub local_port: u16,
}

impl TunnelSpec {
    pub fn new(remote_port: u16, local_port: u16) -> Result<Self, TunnelError> {
        if remote_port == 0 || local_port == 0 {
            return Err(TunnelError::Configuration(format!(
                "tunnel ports must be positive, got {remote_port}->{local_port}"
            )));
        }
        Ok(Self {
            remote_port,
            local_port,
        })
    }
}
