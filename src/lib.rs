//! Payment transaction and payout distribution engine for the community
//! platform backend.
//!
//! The HTTP binary in `main.rs` wires these modules together; tests and other
//! services can embed the engine directly through [`services`].

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
