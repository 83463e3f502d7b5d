//! Liveness monitoring of configured servers.

pub mod health;
