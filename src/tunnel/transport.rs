//! russh-backed implementation of the session seam.
//!
//! ## Connection establishment
//!
//! Direct sessions dial `host:22` over TCP; chained sessions run a second,
//! fully independent handshake over a pre-opened direct-tcpip channel via
//! [`client::connect_stream`]. Both paths share the same client
//! configuration: no inactivity timeout (sessions are long-lived by design),
//! keepalives every profile interval with at most 3 missed before the
//! transport is declared dead, which is what eventually drives the reconnect
//! path when a node goes away silently.
//!
//! ## Inbound connections
//!
//! Remote listeners registered with `tcpip_forward` surface inbound TCP
//! connections as `forwarded-tcpip` channel opens. The handler must never
//! await relay I/O: blocking it stalls the session driver and deadlocks the
//! whole connection, so channels are handed off through a bounded queue with
//! `try_send` and the consumer does the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{Channel, Disconnect, keys};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::tunnel::error::TunnelError;
use crate::tunnel::profile::ConnectionProfile;
use crate::tunnel::session::{
    BoxOutput, BoxTransport, Established, InboundConnection, SessionFactory, SshSession,
};

const SSH_PORT: u16 = 22;

/// Missed keepalives before the transport is considered dead.
const KEEPALIVE_MAX: usize = 3;

/// Queue depth between the session driver and the inbound dispatcher.
const INBOUND_QUEUE: usize = 32;

/// Build the russh client configuration for one connection attempt.
pub(crate) fn build_client_config(keepalive: Duration) -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(keepalive),
        keepalive_max: KEEPALIVE_MAX,
        nodelay: true,
        ..Default::default()
    })
}

/// Client handler that accepts all host keys (`StrictHostKeyChecking=no`)
/// and queues forwarded-tcpip channel opens for the inbound dispatcher.
pub struct ClientHandler {
    inbound: mpsc::Sender<Box<dyn InboundConnection>>,
}

impl ClientHandler {
    fn new(inbound: mpsc::Sender<Box<dyn InboundConnection>>) -> Self {
        Self { inbound }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        _connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!(
            port = connected_port,
            origin = %format!("{originator_address}:{originator_port}"),
            "inbound connection on remote listener"
        );
        let conn = RusshInbound {
            port: connected_port as u16,
            channel,
        };
        // Must not await here: a full queue stalls the session driver.
        // Dropping the channel closes it, which is the backpressure story.
        if self.inbound.try_send(Box::new(conn)).is_err() {
            debug!(port = connected_port, "inbound queue unavailable, dropping");
        }
        Ok(())
    }
}

struct RusshInbound {
    port: u16,
    channel: Channel<client::Msg>,
}

#[async_trait]
impl InboundConnection for RusshInbound {
    fn destination_port(&self) -> u16 {
        self.port
    }

    fn into_stream(self: Box<Self>) -> BoxTransport {
        Box::new(self.channel.into_stream())
    }

    async fn reject(mut self: Box<Self>) {
        let _ = self.channel.close().await;
    }
}

/// [`SshSession`] over a live russh handle.
pub struct RusshSession {
    handle: Mutex<client::Handle<ClientHandler>>,
}

#[async_trait]
impl SshSession for RusshSession {
    async fn exec(&self, command: &str) -> Result<BoxOutput, TunnelError> {
        let mut channel = {
            let handle = self.handle.lock().await;
            handle
                .channel_open_session()
                .await
                .map_err(|e| TunnelError::Transport(format!("opening exec channel: {e}")))?
        };
        channel
            .exec(true, command)
            .await
            .map_err(|e| TunnelError::Transport(format!("executing command: {e}")))?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn open_jump(&self, host: &str, port: u16) -> Result<BoxTransport, TunnelError> {
        let handle = self.handle.lock().await;
        let channel = handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| {
                TunnelError::Transport(format!("opening jump channel to {host}:{port}: {e}"))
            })?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn request_forward(&self, port: u16) -> Result<(), TunnelError> {
        let mut handle = self.handle.lock().await;
        handle
            .tcpip_forward("localhost", u32::from(port))
            .await
            .map_err(|e| {
                TunnelError::Transport(format!("registering remote listener on {port}: {e}"))
            })?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TunnelError> {
        let handle = self.handle.lock().await;
        handle
            .disconnect(Disconnect::ByApplication, "shutting down", "en")
            .await
            .map_err(|e| TunnelError::Transport(format!("disconnecting: {e}")))
    }

    async fn is_closed(&self) -> bool {
        self.handle.lock().await.is_closed()
    }
}

/// Production [`SessionFactory`]: russh handshake plus credential-handle
/// authentication, both under a connect timeout.
pub struct RusshFactory {
    connect_timeout: Duration,
}

impl RusshFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SessionFactory for RusshFactory {
    async fn open(
        &self,
        profile: ConnectionProfile,
        transport: Option<BoxTransport>,
    ) -> Result<Established, TunnelError> {
        let config = build_client_config(profile.keepalive);
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let handler = ClientHandler::new(tx);

        let mut handle = match transport {
            Some(stream) => {
                tokio::time::timeout(
                    self.connect_timeout,
                    client::connect_stream(config, stream, handler),
                )
                .await
                .map_err(|_| {
                    TunnelError::Transport(format!(
                        "chained handshake timed out after {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|e| TunnelError::Transport(format!("chained handshake failed: {e}")))?
            }
            None => {
                let host = profile.host.as_deref().ok_or_else(|| {
                    TunnelError::Configuration(
                        "connection profile has neither a host nor a pre-opened transport"
                            .to_string(),
                    )
                })?;
                tokio::time::timeout(
                    self.connect_timeout,
                    client::connect(config, (host, SSH_PORT), handler),
                )
                .await
                .map_err(|_| {
                    TunnelError::Transport(format!(
                        "handshake with {host} timed out after {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|e| TunnelError::Transport(format!("connecting to {host}: {e}")))?
            }
        };

        profile
            .auth
            .authenticate(&mut handle, &profile.username)
            .await?;

        Ok(Established {
            session: Arc::new(RusshSession {
                handle: Mutex::new(handle),
            }),
            inbound: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_keeps_session_open_indefinitely() {
        let config = build_client_config(Duration::from_secs(30));
        assert_eq!(config.inactivity_timeout, None);
    }

    #[test]
    fn test_config_keepalive_from_profile() {
        let config = build_client_config(Duration::from_secs(45));
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(45)));
        assert_eq!(config.keepalive_max, KEEPALIVE_MAX);
    }

    #[tokio::test]
    async fn test_factory_requires_host_or_transport() {
        use crate::tunnel::auth::AuthMethod;

        let factory = RusshFactory::new(Duration::from_secs(1));
        let profile = ConnectionProfile {
            host: None,
            username: "alice".to_string(),
            auth: AuthMethod::Agent,
            keepalive: Duration::from_secs(30),
        };
        let result = factory.open(profile, None).await;
        assert!(matches!(result, Err(TunnelError::Configuration(_))));
    }
}
