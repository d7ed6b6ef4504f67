//! Robot Database Layer
//!
//! Durable `SQLite` storage for discovered `(domain, ip, hostname, headers)`
//! records, using `SQLx` with embedded migrations.
//!
//! # Architecture
//!
//! - **Schema**: a `domains` index table and a `data` table with a unique
//!   `(domain, ip, hostname)` identity, NULLs included
//! - **Writes**: every write is an upsert; batches for one domain run in a
//!   single transaction and are serialized, batches for different domains
//!   are not
//! - **Reads**: `dump` returns complete rows in `(hostname, ip)` order
//!
//! # Example
//!
//! ```rust
//! use robot_core::DiscoveryRecord;
//! use robot_db::Database;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(":memory:").await?;
//! db.run_migrations().await?;
//!
//! let records: Vec<_> = DiscoveryRecord::new("example.com", Some("1.2.3.4"), Some("a.example.com"), None)
//!     .into_iter()
//!     .collect();
//! db.upsert_records("example.com", &records).await?;
//!
//! assert_eq!(db.dump("example.com").await?.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod migrations;
pub mod records;

// Re-export commonly used types
pub use error::{DatabaseError, Result};
pub use records::UpsertStats;

use robot_core::DiscoveryRecord;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// The record store.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct Database {
    pool: sqlx::Pool<sqlx::Sqlite>,
    domain_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Database {
    /// Open the database at `path`, or an in-memory one for `:memory:`.
    ///
    /// Call [`Database::run_migrations`] before use.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connection::connect(path).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: sqlx::Pool<sqlx::Sqlite>) -> Self {
        Self {
            pool,
            domain_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run all pending database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }

    fn domain_lock(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .domain_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(domain.to_string()).or_default().clone()
    }

    /// Upsert `records` into `domain` atomically.
    ///
    /// Either the whole batch is written or nothing is. Concurrent calls for
    /// the same domain run one after another.
    pub async fn upsert_records(
        &self,
        domain: &str,
        records: &[DiscoveryRecord],
    ) -> Result<UpsertStats> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock().await;

        let write_error = |source| DatabaseError::StoreWrite {
            domain: domain.to_string(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(write_error)?;
        let stats = records::upsert_batch(&mut *tx, domain, records)
            .await
            .map_err(write_error)?;
        tx.commit().await.map_err(write_error)?;

        tracing::info!(
            domain,
            inserted = stats.inserted,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "Records upserted"
        );
        Ok(stats)
    }

    /// Upsert records of any number of domains, one transaction per domain.
    ///
    /// Stops at the first failing domain; domains written before it stay
    /// committed.
    pub async fn upsert(&self, records: &[DiscoveryRecord]) -> Result<UpsertStats> {
        let mut by_domain: BTreeMap<&str, Vec<DiscoveryRecord>> = BTreeMap::new();
        for record in records {
            by_domain
                .entry(record.domain.as_str())
                .or_default()
                .push(record.clone());
        }

        let mut total = UpsertStats::default();
        for (domain, batch) in by_domain {
            total.absorb(self.upsert_records(domain, &batch).await?);
        }
        Ok(total)
    }

    /// Every record of `domain`, ordered by hostname then IP.
    pub async fn dump(&self, domain: &str) -> Result<Vec<DiscoveryRecord>> {
        Ok(records::dump(&self.pool, domain).await?)
    }

    /// All domains that have ever been written.
    pub async fn list_domains(&self) -> Result<BTreeSet<String>> {
        Ok(records::list_domains(&self.pool).await?)
    }

    /// Number of rows stored for `domain`.
    pub async fn record_count(&self, domain: &str) -> Result<i64> {
        Ok(records::record_count(&self.pool, domain).await?)
    }
}
