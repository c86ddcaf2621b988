//! dbscope — transactional data access with scoped, nestable units of work.
//!
//! This facade crate re-exports the dbscope sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use dbscope::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature     | Default | Crate                          |
//! |-------------|---------|--------------------------------|
//! | `data-sqlx` | **yes** | `dbscope-data-sqlx`            |
//! | `postgres`  | **yes** | `dbscope-data-sqlx/postgres`   |
//! | `sqlite`    | no      | `dbscope-data-sqlx/sqlite`     |
//! | `cache`     | no      | `dbscope-cache`                |
//! | `full`      | no      | All of the above               |

pub use dbscope_core;
pub use dbscope_data;

// The backend-agnostic core is always available at the top level.
pub use dbscope_data::*;

pub use dbscope_core::{init_tracing, init_tracing_json, DbscopeConfig};

#[cfg(feature = "data-sqlx")]
pub use dbscope_data_sqlx;

#[cfg(feature = "data-sqlx")]
pub use dbscope_data_sqlx::{Database, DbScope};

#[cfg(feature = "cache")]
pub use dbscope_cache;

/// Unified prelude: import everything with `use dbscope::prelude::*`.
///
/// Includes the data prelude plus types from all enabled feature crates.
pub mod prelude {
    pub use dbscope_core::{ConfigProperties, DbscopeConfig, PoolConfig, PostgresConfig};
    pub use dbscope_data::prelude::*;

    #[cfg(feature = "data-sqlx")]
    pub use dbscope_data_sqlx::prelude::*;

    #[cfg(feature = "cache")]
    pub use dbscope_cache::{CacheStore, InMemoryCache};
}
