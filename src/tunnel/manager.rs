//! Session lifecycle: single-flight establishment, caching, and reconnect.
//!
//! One [`ConnectionManager`] owns one SSH session at a time and moves through
//! `Disconnected → Connecting → Ready`, with `ReconnectPending` between a
//! lost session (or failed handshake) and the next attempt, and a terminal
//! `Closed` once [`ConnectionManager::close`] runs. The states are not
//! reified; they fall out of {cached session, retry counter, running flag}:
//!
//! - the session slot's async mutex is held across the whole handshake, so
//!   concurrent callers are served by the same attempt and a manager never
//!   has two handshakes in flight;
//! - the retry counter resets to 0 only on successful establishment and
//!   otherwise grows by exactly 1 after each failed scheduled attempt;
//! - the running flag goes true→false at most once, and every backoff wait
//!   also watches the cancellation token, so `close()` can never race a
//!   pending session-loss into a resurrected session.
//!
//! ## Backoff
//!
//! The delay before the Nth scheduled attempt is `base * 2^(N-1)`, uncapped
//! and unjittered, and the loop never gives up while running. A manager left
//! alone long enough will wait hours between attempts; that is intentional.
//!
//! The variant-specific part of establishment (how the connection profile
//! and its transport come to be) is injected as a [`ProfileStrategy`]:
//! direct managers hand over a fixed profile, jumped managers clone their
//! parent's profile, drop its host, and attach a freshly opened jump channel.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tunnel::error::TunnelError;
use crate::tunnel::profile::ConnectionProfile;
use crate::tunnel::session::{
    BoxOutput, BoxTransport, InboundReceiver, SessionFactory, SshSession,
};

const SSH_PORT: u16 = 22;

/// Builds the profile (and optional pre-opened transport) for one connection
/// attempt. Rebuilt on every attempt, never reused.
#[async_trait]
pub trait ProfileStrategy: Send + Sync {
    async fn build(&self) -> Result<(ConnectionProfile, Option<BoxTransport>), TunnelError>;
}

/// Direct variant: the supplied profile, unchanged, no pre-opened transport.
pub struct DirectProfile {
    profile: ConnectionProfile,
}

impl DirectProfile {
    pub fn new(profile: ConnectionProfile) -> Result<Self, TunnelError> {
        if profile.host.is_none() {
            return Err(TunnelError::Configuration(
                "a direct connection requires a host".to_string(),
            ));
        }
        if profile.username.is_empty() {
            return Err(TunnelError::Configuration(
                "a connection profile requires a username".to_string(),
            ));
        }
        Ok(Self { profile })
    }
}

#[async_trait]
impl ProfileStrategy for DirectProfile {
    async fn build(&self) -> Result<(ConnectionProfile, Option<BoxTransport>), TunnelError> {
        Ok((self.profile.clone(), None))
    }
}

/// Jumped variant: the parent's profile minus its host, carried over a jump
/// channel opened through the parent's session on every attempt.
pub struct JumpedProfile {
    parent: Arc<ConnectionManager>,
    host: String,
    template: ConnectionProfile,
}

impl JumpedProfile {
    pub fn new(parent: Arc<ConnectionManager>, host: String, template: ConnectionProfile) -> Self {
        Self {
            parent,
            host,
            template,
        }
    }
}

#[async_trait]
impl ProfileStrategy for JumpedProfile {
    async fn build(&self) -> Result<(ConnectionProfile, Option<BoxTransport>), TunnelError> {
        let transport = self.parent.open_jump_channel(&self.host).await?;
        let mut profile = self.template.clone();
        profile.host = None;
        Ok((profile, Some(transport)))
    }
}

/// Reusable session-lifecycle capability; see the module docs.
pub struct ConnectionManager {
    strategy: Box<dyn ProfileStrategy>,
    factory: Arc<dyn SessionFactory>,
    base_delay: Duration,
    slot: Mutex<Option<Arc<dyn SshSession>>>,
    /// Inbound queue of the most recent handshake, parked until the owner
    /// claims it with [`ConnectionManager::take_inbound`].
    pending_inbound: Mutex<Option<InboundReceiver>>,
    retries: AtomicU32,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        strategy: Box<dyn ProfileStrategy>,
        factory: Arc<dyn SessionFactory>,
        base_delay: Duration,
    ) -> Self {
        Self {
            strategy,
            factory,
            base_delay,
            slot: Mutex::new(None),
            pending_inbound: Mutex::new(None),
            retries: AtomicU32::new(0),
            running: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cached live session, or exactly one handshake attempt.
    ///
    /// The slot mutex is held for the duration of the handshake: concurrent
    /// callers queue behind it and find the cached session when their turn
    /// comes. A cached session that reports closed is discarded first.
    pub async fn obtain_session(&self) -> Result<Arc<dyn SshSession>, TunnelError> {
        let mut slot = self.slot.lock().await;

        // Checked under the slot lock so a concurrent close() cannot be
        // followed by a resurrected session.
        if !self.is_running() {
            return Err(TunnelError::Transport(
                "connection manager is closed".to_string(),
            ));
        }

        if let Some(session) = slot.as_ref() {
            if !session.is_closed().await {
                return Ok(Arc::clone(session));
            }
            debug!("cached session is dead, discarding");
            *slot = None;
        }

        let (profile, transport) = self.strategy.build().await?;
        let established = self.factory.open(profile, transport).await?;

        self.retries.store(0, Ordering::SeqCst);
        *self.pending_inbound.lock().await = Some(established.inbound);
        let session = established.session;
        *slot = Some(Arc::clone(&session));
        debug!("session established");
        Ok(session)
    }

    /// Claim the inbound queue of the most recently established session.
    /// Returns `None` if no handshake happened since the last claim.
    pub async fn take_inbound(&self) -> Option<InboundReceiver> {
        self.pending_inbound.lock().await.take()
    }

    /// Run a command on the current session, obtaining one if absent.
    pub async fn exec(&self, command: &str) -> Result<BoxOutput, TunnelError> {
        let session = self.obtain_session().await?;
        session.exec(command).await
    }

    /// Open a channel to `host:22` inside the current session, for use as a
    /// child manager's handshake transport.
    pub async fn open_jump_channel(&self, host: &str) -> Result<BoxTransport, TunnelError> {
        let session = self.obtain_session().await?;
        session.open_jump(host, SSH_PORT).await
    }

    /// Register a remote listener on the current session.
    pub async fn listen_forward(&self, port: u16) -> Result<(), TunnelError> {
        let session = self.obtain_session().await?;
        session.request_forward(port).await
    }

    /// Drop the cached session without closing it; used after the transport
    /// already died underneath it.
    pub async fn discard_session(&self) {
        self.slot.lock().await.take();
    }

    /// Retry `connect` with exponential backoff until it succeeds or the
    /// manager stops running. No-op if already stopped.
    pub async fn run_reconnect<F, Fut>(&self, connect: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), TunnelError>>,
    {
        loop {
            if !self.is_running() {
                return;
            }
            let delay = self.backoff_delay();
            debug!(?delay, "scheduling reconnect");
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if !self.is_running() {
                return;
            }
            match connect().await {
                Ok(()) => {
                    info!("reconnected");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                    self.retries.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// `base * 2^retries`, saturating instead of overflowing.
    fn backoff_delay(&self) -> Duration {
        let failures = self.retries.load(Ordering::SeqCst);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(failures))
    }

    pub fn retry_count(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolves once [`ConnectionManager::stop`] has been called.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await;
    }

    /// Flip running to false and cancel pending backoff waits. The flag
    /// never goes back to true. Idempotent, does not touch the session.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.shutdown.cancel();
        }
    }

    /// Stop and gracefully end the active session, if any. Idempotent.
    pub async fn close(&self) {
        self.stop();
        let session = self.slot.lock().await.take();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                debug!(error = %e, "error during session teardown");
            }
        }
    }
}
