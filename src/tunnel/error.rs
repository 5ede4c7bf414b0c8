//! Error taxonomy for the tunnel core.
//!
//! Four kinds of failure, with very different blast radii:
//!
//! - [`TunnelError::Configuration`] - malformed or missing profile data,
//!   raised before any connection attempt; the only error that aborts the
//!   process.
//! - [`TunnelError::Transport`] - handshake or listener-registration
//!   failure; absorbed by the reconnect/backoff path, except a node agent's
//!   very first `connect()` which is reported to the discovery step so the
//!   hostname is retried on the next poll.
//! - [`TunnelError::Relay`] - local-socket connect or mid-stream I/O failure
//!   on one forwarded connection; isolated to that connection.
//! - [`TunnelError::Unroutable`] - inbound request for a port no tunnel spec
//!   covers; rejected without allocating anything.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    /// Fatal; raised before any connection attempt.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Handshake, command, or listener-registration failure. Recoverable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure scoped to one forwarded connection.
    #[error("relay error: {0}")]
    Relay(String),

    /// Inbound connection for a remote port with no matching tunnel spec.
    #[error("no tunnel configured for remote port {0}")]
    Unroutable(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = TunnelError::Configuration("missing host".to_string());
        assert_eq!(err.to_string(), "configuration error: missing host");

        let err = TunnelError::Transport("handshake timed out".to_string());
        assert_eq!(err.to_string(), "transport error: handshake timed out");

        let err = TunnelError::Relay("connection refused".to_string());
        assert_eq!(err.to_string(), "relay error: connection refused");
    }

    #[test]
    fn test_unroutable_names_the_port() {
        let err = TunnelError::Unroutable(8888);
        assert!(err.to_string().contains("8888"));
    }
}
