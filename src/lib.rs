//! Keeps TCP tunnels alive between a local machine and the compute nodes of
//! the user's running Slurm jobs, reachable only through an SSH login host.

pub mod cli;
pub mod config;
pub mod ssh_config;
pub mod tunnel;
