//! Per-node tunnel agent.
//!
//! One agent per compute node. It owns a chained connection manager whose
//! sessions ride through the login host, registers one remote listener per
//! tunnel pair, and relays every inbound connection to the matching local
//! port. When the chained session dies the agent reconnects through its own
//! manager; the login-side manager is untouched.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncWriteExt, copy_bidirectional};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::tunnel::error::TunnelError;
use crate::tunnel::manager::ConnectionManager;
use crate::tunnel::profile::TunnelSpec;
use crate::tunnel::session::{InboundConnection, InboundReceiver};

pub struct TunnelAgent {
    host: String,
    manager: Arc<ConnectionManager>,
    specs: Arc<[TunnelSpec]>,
}

impl TunnelAgent {
    /// `manager` must be built with a chained (jumped) profile strategy for
    /// `host`; the agent only drives its lifecycle.
    pub fn new(host: String, manager: Arc<ConnectionManager>, specs: Arc<[TunnelSpec]>) -> Self {
        Self {
            host,
            manager,
            specs,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Establish (or re-establish) the chained session, start the inbound
    /// dispatcher, and register every remote listener.
    ///
    /// The dispatcher starts before the listeners are registered so no
    /// inbound connection can arrive without a consumer.
    pub async fn connect(self: Arc<Self>) -> Result<(), TunnelError> {
        self.manager.obtain_session().await?;
        if let Some(inbound) = self.manager.take_inbound().await {
            tokio::spawn(Arc::clone(&self).dispatch(inbound));
        }
        for spec in self.specs.iter() {
            self.manager.listen_forward(spec.remote_port).await?;
            info!(
                host = %self.host,
                remote = spec.remote_port,
                local = spec.local_port,
                "tunnel listening"
            );
        }
        Ok(())
    }

    /// Consume the inbound queue, relaying each connection on its own task.
    /// The queue closing means the session driver exited; if the agent is
    /// still running that is a session loss and the reconnect loop starts.
    ///
    /// Boxed: the reconnect path re-enters `connect`, which spawns this
    /// future again, so the type has to be erased to stay finite.
    fn dispatch(self: Arc<Self>, mut inbound: InboundReceiver) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            while let Some(conn) = inbound.recv().await {
                let agent = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = agent.relay(conn).await {
                        warn!(host = %agent.host, error = %e, "relay failed");
                    }
                });
            }
            if !self.manager.is_running() {
                return;
            }
            warn!(host = %self.host, "session to node lost, reconnecting");
            self.manager.discard_session().await;
            let agent = Arc::clone(&self);
            self.manager
                .run_reconnect(move || Arc::clone(&agent).connect())
                .await;
        })
    }

    /// Pipe one inbound connection to the local service mapped to its
    /// destination port.
    async fn relay(&self, conn: Box<dyn InboundConnection>) -> Result<(), TunnelError> {
        let port = conn.destination_port();
        let Some(spec) = self.specs.iter().find(|s| s.remote_port == port) else {
            conn.reject().await;
            return Err(TunnelError::Unroutable(port));
        };

        let local = match TcpStream::connect(("127.0.0.1", spec.local_port)).await {
            Ok(stream) => stream,
            Err(e) => {
                conn.reject().await;
                return Err(TunnelError::Relay(format!(
                    "local port {} refused: {e}",
                    spec.local_port
                )));
            }
        };

        debug!(
            host = %self.host,
            remote = spec.remote_port,
            local = spec.local_port,
            "relaying connection"
        );
        let mut remote = conn.into_stream();
        let mut local = local;
        let result = copy_bidirectional(&mut remote, &mut local).await;
        let _ = remote.shutdown().await;
        let _ = local.shutdown().await;
        result
            .map(|_| ())
            .map_err(|e| TunnelError::Relay(format!("relay to port {} ended: {e}", spec.local_port)))
    }

    /// Stop the lifecycle and close the chained session. Idempotent.
    pub async fn close(&self) {
        self.manager.close().await;
    }
}
