//! Discovery loop and agent registry.
//!
//! The orchestrator owns the login-host connection and polls the scheduler
//! for the nodes currently running the user's jobs. Every node name it has
//! not seen before gets a [`TunnelAgent`] chained through the login session.
//! Agents are never pruned while the orchestrator runs; a node that leaves
//! the job list keeps its agent, which simply retries in the background until
//! the node comes back or the process exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::tunnel::agent::TunnelAgent;
use crate::tunnel::error::TunnelError;
use crate::tunnel::manager::{ConnectionManager, JumpedProfile};
use crate::tunnel::profile::{ConnectionProfile, TunnelSpec};
use crate::tunnel::session::{InboundReceiver, SessionFactory};

/// Lists the nodes of the invoking user's running jobs, one name per line.
const DISCOVERY_COMMAND: &str = "squeue --me --format=\"%N\" --noheader";

pub struct Orchestrator {
    manager: Arc<ConnectionManager>,
    profile: ConnectionProfile,
    specs: Arc<[TunnelSpec]>,
    poll_interval: Duration,
    base_delay: Duration,
    factory: Arc<dyn SessionFactory>,
    agents: tokio::sync::Mutex<HashMap<String, Arc<TunnelAgent>>>,
}

impl Orchestrator {
    pub fn new(
        manager: Arc<ConnectionManager>,
        factory: Arc<dyn SessionFactory>,
        profile: ConnectionProfile,
        specs: Arc<[TunnelSpec]>,
        poll_interval: Duration,
        base_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            profile,
            specs,
            poll_interval,
            base_delay,
            factory,
            agents: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Establish the login session and start watching it for loss.
    pub async fn connect(self: Arc<Self>) -> Result<(), TunnelError> {
        self.manager.obtain_session().await?;
        self.ensure_supervised().await;
        Ok(())
    }

    /// If a fresh handshake left an unclaimed inbound queue, spawn the
    /// supervisor that watches it for closure. The login session registers no
    /// listeners, so anything arriving on the queue is a stray and is turned
    /// away.
    async fn ensure_supervised(self: Arc<Self>) {
        if let Some(inbound) = self.manager.take_inbound().await {
            tokio::spawn(self.supervise(inbound));
        }
    }

    /// Boxed: the session-loss path re-enters `connect`, which spawns this
    /// future again, so the type has to be erased to stay finite.
    fn supervise(self: Arc<Self>, mut inbound: InboundReceiver) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            while let Some(conn) = inbound.recv().await {
                warn!(
                    port = conn.destination_port(),
                    "unexpected inbound on login session"
                );
                conn.reject().await;
            }
            self.on_login_session_lost().await;
        })
    }

    /// The login session died: every chained agent died with it. Tear the
    /// agents down, forget them, and reconnect; discovery then rebuilds the
    /// fleet from the next job listing.
    async fn on_login_session_lost(self: Arc<Self>) {
        if !self.manager.is_running() {
            return;
        }
        warn!("login session lost, reconnecting");
        self.close_agents().await;
        self.manager.discard_session().await;
        let orch = Arc::clone(&self);
        self.manager
            .run_reconnect(move || Arc::clone(&orch).connect())
            .await;
    }

    /// Discovery loop. Runs until [`Orchestrator::close`].
    pub async fn run(self: Arc<Self>) {
        if let Err(e) = Arc::clone(&self).connect().await {
            // Not fatal: the first poll retries through the same manager.
            warn!(error = %e, "initial connection failed, will retry");
        }
        while self.manager.is_running() {
            if let Err(e) = Arc::clone(&self).poll_once().await {
                warn!(error = %e, "node discovery failed");
            }
            tokio::select! {
                _ = self.manager.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One discovery pass: list nodes, set up an agent for each new one.
    ///
    /// Setup happens inline so a failure surfaces this pass and the node is
    /// retried on the next one instead of being half-registered.
    async fn poll_once(self: Arc<Self>) -> Result<(), TunnelError> {
        let output = self.manager.exec(DISCOVERY_COMMAND).await?;
        Arc::clone(&self).ensure_supervised().await;

        let mut lines = BufReader::new(output).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| TunnelError::Transport(format!("reading job listing: {e}")))?
        {
            let node = line.trim();
            if node.is_empty() {
                continue;
            }
            if self.agents.lock().await.contains_key(node) {
                continue;
            }
            match self.spawn_agent(node).await {
                Ok(agent) => {
                    info!(host = node, "tunnel agent started");
                    self.agents.lock().await.insert(node.to_string(), agent);
                }
                Err(e) => {
                    warn!(host = node, error = %e, "agent setup failed, will retry next poll");
                }
            }
        }
        Ok(())
    }

    /// Build and connect one chained agent for `node`.
    async fn spawn_agent(&self, node: &str) -> Result<Arc<TunnelAgent>, TunnelError> {
        if !self.manager.is_running() {
            return Err(TunnelError::Transport(
                "orchestrator is shutting down".to_string(),
            ));
        }
        let strategy = JumpedProfile::new(
            Arc::clone(&self.manager),
            node.to_string(),
            self.profile.clone(),
        );
        let manager = Arc::new(ConnectionManager::new(
            Box::new(strategy),
            Arc::clone(&self.factory),
            self.base_delay,
        ));
        let agent = Arc::new(TunnelAgent::new(
            node.to_string(),
            manager,
            Arc::clone(&self.specs),
        ));
        Arc::clone(&agent).connect().await?;
        Ok(agent)
    }

    pub async fn registered_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.agents.lock().await.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    async fn close_agents(&self) {
        let agents: Vec<Arc<TunnelAgent>> = self.agents.lock().await.drain().map(|(_, a)| a).collect();
        futures::future::join_all(agents.iter().map(|a| a.close())).await;
    }

    /// Stop discovery, close every agent, then the login session. Idempotent.
    pub async fn close(&self) {
        self.manager.stop();
        self.close_agents().await;
        self.manager.close().await;
        info!("orchestrator shut down");
    }
}
