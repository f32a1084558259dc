//! # sift-db
//!
//! PostgreSQL persistence layer for the sift analysis pipeline.
//!
//! Provides the production [`WorkItemStore`](sift_core::WorkItemStore) and
//! [`AnalysisStore`](sift_core::AnalysisStore) implementations backed by
//! sqlx/PostgreSQL, plus in-memory implementations (feature `memory`) used by
//! tests and ephemeral deployments.
//!
//! The durable store is the source of truth for queue state: the in-memory
//! queue view in `sift-dispatch` is a derived cache rebuilt from these tables.

pub mod analyses;
pub mod pool;
pub mod work_items;

#[cfg(feature = "memory")]
pub mod memory;

pub use analyses::PgAnalysisStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use work_items::PgWorkItemStore;

#[cfg(feature = "memory")]
pub use memory::{MemoryAnalysisStore, MemoryRemoteCache, MemoryWorkItemStore};

// Re-export core types
pub use sift_core::*;

/// Run embedded schema migrations (feature `migrations`).
#[cfg(feature = "migrations")]
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Internal(format!("Migration failed: {e}")))?;
    Ok(())
}
