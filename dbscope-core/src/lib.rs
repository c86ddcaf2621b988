//! # dbscope-core — ambient runtime for the dbscope data layer
//!
//! Configuration loading and `tracing` setup shared by every dbscope crate.
//!
//! | Item | Description |
//! |------|-------------|
//! | [`DbscopeConfig`] | Layered YAML / `.env` / environment configuration |
//! | [`PostgresConfig`], [`PoolConfig`] | Database connection and pool sections (`PG_*`) |
//! | [`CacheConfig`] | Cache collaborator section (`RD_*`) |
//! | [`init_tracing`] | Installs the default `tracing` subscriber |

pub mod config;
mod logging;

pub use config::{
    CacheConfig, ConfigError, ConfigProperties, ConfigValue, DbscopeConfig, PoolConfig,
    PostgresConfig,
};
pub use logging::{init_tracing, init_tracing_json, try_init_tracing, try_init_tracing_json};
