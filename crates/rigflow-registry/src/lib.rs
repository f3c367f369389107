//! rigflow-registry — static-per-campaign topology data.
//!
//! A campaign tests a set of *platforms* (named target configurations, each
//! with required capability labels) on *agents* (machines advertising label
//! sets) grouped into capacity-bounded *pools*. This crate parses the
//! campaign configuration, validates it into typed records, and applies the
//! availability policy that decides which agents the scheduler may use.
//!
//! The registry is read-only once built; all mutable campaign state lives in
//! `rigflow-state`.

pub mod config;
pub mod error;
pub mod registry;

pub use config::{AgentConfig, PlatformConfig, PoolConfig, RegistryConfig};
pub use error::{RegistryError, RegistryResult};
pub use registry::{Agent, BackendAgent, Platform, Pool, Registry, UnavailableReason};
