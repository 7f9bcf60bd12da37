//! Warden Core: connector registry, run driver, leases, run policy and scheduler.

pub mod config;
pub mod connectors;
pub mod context;
pub mod db;
pub mod error;
pub mod lock;
pub mod lock_runner;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod reporter;
pub mod runner;
pub mod scheduler;
pub mod signal;

#[cfg(test)]
mod testing;
