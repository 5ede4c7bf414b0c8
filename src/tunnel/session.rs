//! Session abstraction the lifecycle machinery is written against.
//!
//! The connection manager, node agents, and orchestrator only ever see these
//! traits; the russh-backed implementation lives in [`crate::tunnel::transport`]
//! and scripted fakes live in the `testing` module below. Keeping the seam
//! here is what lets the reconnect/backoff and relay logic be exercised
//! without a live SSH server.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::tunnel::error::TunnelError;
use crate::tunnel::profile::ConnectionProfile;

/// A bidirectional byte stream (TCP socket, SSH channel, in-memory pipe).
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxTransport = Box<dyn Transport>;

/// Readable output of a remote command.
pub type BoxOutput = Box<dyn AsyncRead + Send + Unpin>;

/// An authenticated, multiplexable session.
#[async_trait]
pub trait SshSession: Send + Sync {
    /// Run a command on the remote side and return its output stream.
    async fn exec(&self, command: &str) -> Result<BoxOutput, TunnelError>;

    /// Open a byte-stream channel terminating at `host:port`, suitable as the
    /// transport of a second, fully independent handshake chained inside this
    /// session.
    async fn open_jump(&self, host: &str, port: u16) -> Result<BoxTransport, TunnelError>;

    /// Ask the remote end to accept inbound TCP connections on `port` and
    /// surface each one as an [`InboundConnection`].
    async fn request_forward(&self, port: u16) -> Result<(), TunnelError>;

    /// Graceful disconnect. Tears down every channel and remote listener.
    async fn close(&self) -> Result<(), TunnelError>;

    async fn is_closed(&self) -> bool;
}

/// One connection arriving on a remote listener, not yet wired anywhere.
#[async_trait]
pub trait InboundConnection: Send {
    /// Remote port the peer connected to.
    fn destination_port(&self) -> u16;

    /// Accept the connection and take its relay stream.
    fn into_stream(self: Box<Self>) -> BoxTransport;

    /// Turn the connection away without opening anything locally.
    async fn reject(self: Box<Self>);
}

pub type InboundReceiver = mpsc::Receiver<Box<dyn InboundConnection>>;
pub type InboundSender = mpsc::Sender<Box<dyn InboundConnection>>;

/// A freshly established session plus the queue its inbound connections
/// arrive on. The queue closing is the session-loss signal.
pub struct Established {
    pub session: Arc<dyn SshSession>,
    pub inbound: InboundReceiver,
}

/// Performs one handshake attempt from a profile.
///
/// `transport` carries the pre-opened jump channel for chained connections;
/// direct connections dial the profile's host instead.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(
        &self,
        profile: ConnectionProfile,
        transport: Option<BoxTransport>,
    ) -> Result<Established, TunnelError>;
}
