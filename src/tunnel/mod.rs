//! Tunnel core: session lifecycle, per-node agents, and node discovery.
//!
//! This module is organized into the following submodules:
//!
//! - `error`: Error taxonomy shared by every layer
//! - `profile`: Connection profiles and tunnel specifications
//! - `auth`: Credential handles (agent, key file, password)
//! - `session`: Trait seam the lifecycle machinery is written against
//! - `transport`: russh-backed implementation of the seam
//! - `manager`: Single-flight session caching and reconnect with backoff
//! - `agent`: Per-node remote listeners and connection relaying
//! - `orchestrator`: Scheduler polling and the agent registry

pub mod agent;
pub mod auth;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod profile;
pub mod session;
pub mod transport;

pub use agent::TunnelAgent;
pub use error::TunnelError;
pub use manager::{ConnectionManager, DirectProfile, JumpedProfile};
pub use orchestrator::Orchestrator;
pub use profile::{ConnectionProfile, TunnelSpec};
