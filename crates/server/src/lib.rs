//! `clasper-server`: the HTTP + JSON control plane (spec.md §6, §9).
//!
//! Split into a library so integration tests can drive the router directly
//! without binding a socket; `main.rs` is a thin env-reading wrapper.

pub mod auth_extract;
pub mod error;
pub mod routes;
pub mod state;
