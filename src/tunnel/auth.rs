//! Credential handles for SSH authentication.
//!
//! The tunnel core never authenticates by itself; it hands the session to one
//! of these methods. Agent authentication is the default and tries every
//! identity the agent offers until one is accepted.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use russh::{client, keys};
use tracing::{debug, info};

use crate::tunnel::error::TunnelError;
use crate::tunnel::transport::ClientHandler;

/// A resolved credential handle, ready to authenticate a fresh session.
#[derive(Clone)]
pub enum AuthMethod {
    /// ssh-agent via `SSH_AUTH_SOCK`.
    Agent,
    /// Private key file.
    Key(PathBuf),
    /// Plain password.
    Password(String),
}

impl AuthMethod {
    pub(crate) async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<(), TunnelError> {
        match self {
            AuthMethod::Agent => authenticate_with_agent(handle, username).await,
            AuthMethod::Key(path) => {
                let key = keys::load_secret_key(path, None).map_err(|e| {
                    TunnelError::Transport(format!("cannot load key {}: {e}", path.display()))
                })?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                let result = handle
                    .authenticate_publickey(
                        username,
                        keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(|e| TunnelError::Transport(format!("key authentication: {e}")))?;
                if result.success() {
                    Ok(())
                } else {
                    Err(TunnelError::Transport(format!(
                        "key {} was not accepted",
                        path.display()
                    )))
                }
            }
            AuthMethod::Password(secret) => {
                let result = handle
                    .authenticate_password(username, secret.as_str())
                    .await
                    .map_err(|e| TunnelError::Transport(format!("password authentication: {e}")))?;
                if result.success() {
                    Ok(())
                } else {
                    Err(TunnelError::Transport(
                        "password was not accepted".to_string(),
                    ))
                }
            }
        }
    }
}

/// Try every identity the agent holds until one is accepted.
async fn authenticate_with_agent(
    handle: &mut client::Handle<ClientHandler>,
    username: &str,
) -> Result<(), TunnelError> {
    let mut agent = keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|e| TunnelError::Transport(format!("cannot reach ssh-agent: {e}")))?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| TunnelError::Transport(format!("listing agent identities: {e}")))?;

    if identities.is_empty() {
        return Err(TunnelError::Transport(
            "ssh-agent holds no identities".to_string(),
        ));
    }

    for identity in identities {
        debug!(comment = ?identity.comment(), "trying agent identity");

        // For RSA keys, use the best hash algorithm the server supports.
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        match handle
            .authenticate_publickey_with(username, identity.clone(), hash_alg, &mut agent)
            .await
        {
            Ok(result) if result.success() => {
                info!("authenticated via ssh-agent");
                return Ok(());
            }
            Ok(_) => {
                debug!("agent identity not accepted, trying next");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "agent identity errored, trying next");
                continue;
            }
        }
    }

    Err(TunnelError::Transport(
        "ssh-agent authentication failed: no identity accepted".to_string(),
    ))
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Agent => f.write_str("Agent"),
            AuthMethod::Key(path) => f.debug_tuple("Key").field(path).finish(),
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}
