//! SQLite persistence for the verification node
//!
//! ## Tables
//!
//! - `addresses` - Whitelisted owner addresses and balances
//! - `tokens` - Farmer sessions, with their uptime settlement summary
//! - `files` - Logical content units (size, seed, proof interval)
//! - `chunks` - Idle pre-tagged inventory, consumed on assignment
//! - `contracts` - Token/file bindings cycling through challenges
//!
//! The database is the only shared mutable state in the node. Repository
//! modules expose free functions over `&mut SqliteConnection`; services own
//! transaction boundaries.

pub mod addresses;
pub mod chunks;
pub mod contracts;
pub mod diesel_schema;
pub mod files;
pub mod models;
pub mod schema;
pub mod tokens;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::error::NodeError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Pragmas applied to every pooled connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
    wal: bool,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        );
        if self.wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        }
        conn.batch_execute(&pragmas)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled handle to the node database
pub struct NodeDb {
    pool: DbPool,
}

impl NodeDb {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, NodeError> {
        info!(path = %path.display(), "Opening SQLite database");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(8)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout_ms: 5_000,
                wal: true,
            }))
            .build(manager)?;

        Self::init(pool)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every SQLite `:memory:` connection is a separate database, so the
    /// pool holds exactly one.
    pub fn open_in_memory() -> Result<Self, NodeError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout_ms: 5_000,
                wal: false,
            }))
            .build(manager)?;

        Self::init(pool)
    }

    fn init(pool: DbPool) -> Result<Self, NodeError> {
        let db = Self { pool };
        db.with_conn(schema::init_schema)?;
        Ok(db)
    }

    pub fn conn(&self) -> Result<DbConn, NodeError> {
        Ok(self.pool.get_timeout(Duration::from_secs(30))?)
    }

    /// Run `f` with a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, NodeError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, NodeError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Row counts for the health endpoint
    pub fn stats(&self) -> Result<DbStats, NodeError> {
        self.with_conn(|conn| {
            Ok(DbStats {
                addresses: addresses::count_addresses(conn)?,
                tokens: tokens::count_tokens(conn)?,
                files: files::count_files(conn)?,
                chunks: chunks::count_chunks(conn)?,
                contracts: contracts::count_contracts(conn)?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub addresses: i64,
    pub tokens: i64,
    pub files: i64,
    pub chunks: i64,
    pub contracts: i64,
}
