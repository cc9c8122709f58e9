//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::NodeError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), NodeError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, NodeError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| NodeError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let rows: Vec<VersionRow> = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to read schema_version: {}", e)))?;

    Ok(rows.first().map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), NodeError> {
    conn.batch_execute(&format!(
        "DELETE FROM schema_version; INSERT INTO schema_version (version) VALUES ({});",
        version
    ))
    .map_err(|e| NodeError::Internal(format!("Failed to set schema_version: {}", e)))
}

fn create_tables(conn: &mut SqliteConnection) -> Result<(), NodeError> {
    conn.batch_execute(OWNERS_SCHEMA)
        .map_err(|e| NodeError::Internal(format!("Failed to create owner tables: {}", e)))?;

    conn.batch_execute(INVENTORY_SCHEMA)
        .map_err(|e| NodeError::Internal(format!("Failed to create inventory tables: {}", e)))?;

    conn.batch_execute(CONTRACTS_SCHEMA)
        .map_err(|e| NodeError::Internal(format!("Failed to create contract tables: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &mut SqliteConnection, from_version: i32) -> Result<(), NodeError> {
    match from_version {
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)
}

/// Whitelisted addresses and the farmer tokens issued under them
const OWNERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    address TEXT PRIMARY KEY NOT NULL,
    balance BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token TEXT NOT NULL UNIQUE,
    address TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    location_json TEXT,
    farmer_id TEXT NOT NULL UNIQUE,
    heartbeat_count BIGINT NOT NULL DEFAULT 0,
    message TEXT,
    signature TEXT,

    -- Uptime settlement summary (unix ms)
    cache_start BIGINT,
    cache_end BIGINT,
    cache_uptime_ms BIGINT NOT NULL DEFAULT 0,

    created_at BIGINT NOT NULL,
    FOREIGN KEY (address) REFERENCES addresses(address) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tokens_ip ON tokens(ip_address);
CREATE INDEX IF NOT EXISTS idx_tokens_address ON tokens(address);
"#;

/// Files and the idle pre-tagged chunks waiting to be handed out
const INVENTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    hash TEXT PRIMARY KEY NOT NULL,
    size BIGINT NOT NULL,
    seed TEXT NOT NULL,
    redundancy INTEGER NOT NULL,
    interval_secs BIGINT NOT NULL,
    added_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_hash TEXT NOT NULL,
    state BLOB NOT NULL,
    tag_hash TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    FOREIGN KEY (file_hash) REFERENCES files(hash) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_hash);
"#;

const CONTRACTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contracts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token_id BIGINT NOT NULL,
    file_hash TEXT NOT NULL,
    state BLOB NOT NULL,
    challenge BLOB,
    tag_hash TEXT NOT NULL,
    start BIGINT NOT NULL,
    due BIGINT NOT NULL,
    answered BOOLEAN NOT NULL,
    cached BOOLEAN NOT NULL DEFAULT 0,
    UNIQUE (token_id, file_hash),
    FOREIGN KEY (token_id) REFERENCES tokens(id) ON DELETE CASCADE,
    FOREIGN KEY (file_hash) REFERENCES files(hash) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_contracts_token_cached ON contracts(token_id, cached);
CREATE INDEX IF NOT EXISTS idx_contracts_file ON contracts(file_hash);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }
}
