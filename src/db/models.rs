//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! All timestamps are unix milliseconds.

use diesel::prelude::*;
use serde::Serialize;

use super::diesel_schema::*;
use crate::geo::Location;
use crate::verifier::{Challenge, State};

// ============================================================================
// Addresses
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = addresses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Address {
    pub address: String,
    pub balance: i64,
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Token {
    pub id: i64,
    pub token: String,
    pub address: String,
    pub ip_address: String,
    pub location_json: Option<String>,
    pub farmer_id: String,
    pub heartbeat_count: i64,
    pub message: Option<String>,
    pub signature: Option<String>,
    pub cache_start: Option<i64>,
    pub cache_end: Option<i64>,
    pub cache_uptime_ms: i64,
    pub created_at: i64,
}

impl Token {
    /// Stored location, empty if unset or unreadable
    pub fn location(&self) -> Location {
        self.location_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tokens)]
pub struct NewToken<'a> {
    pub token: &'a str,
    pub address: &'a str,
    pub ip_address: &'a str,
    pub location_json: Option<String>,
    pub farmer_id: &'a str,
    pub heartbeat_count: i64,
    pub message: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub cache_uptime_ms: i64,
    pub created_at: i64,
}

// ============================================================================
// Files and chunks
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct File {
    pub hash: String,
    pub size: i64,
    pub seed: String,
    pub redundancy: i32,
    pub interval_secs: i64,
    pub added_at: i64,
}

impl File {
    pub fn interval_ms(&self) -> i64 {
        self.interval_secs * 1000
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = chunks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Chunk {
    pub id: i64,
    pub file_hash: String,
    pub state: Vec<u8>,
    pub tag_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chunks)]
pub struct NewChunk<'a> {
    pub file_hash: &'a str,
    pub state: &'a [u8],
    pub tag_hash: &'a str,
    pub created_at: i64,
}

// ============================================================================
// Contracts
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = contracts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ContractRow {
    pub id: i64,
    pub token_id: i64,
    pub file_hash: String,
    pub state: Vec<u8>,
    pub challenge: Option<Vec<u8>>,
    pub tag_hash: String,
    pub start: i64,
    pub due: i64,
    pub answered: bool,
    pub cached: bool,
}

impl ContractRow {
    pub fn state(&self) -> State {
        State(self.state.clone())
    }

    pub fn challenge(&self) -> Option<Challenge> {
        self.challenge.clone().map(Challenge)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = contracts)]
pub struct NewContract<'a> {
    pub token_id: i64,
    pub file_hash: &'a str,
    pub state: &'a [u8],
    pub challenge: Option<&'a [u8]>,
    pub tag_hash: &'a str,
    pub start: i64,
    pub due: i64,
    pub answered: bool,
    pub cached: bool,
}

/// Mutable lifecycle columns written back after renew/answer
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = contracts)]
#[diesel(treat_none_as_null = true)]
pub struct ContractProgress {
    pub state: Vec<u8>,
    pub challenge: Option<Vec<u8>>,
    pub due: i64,
    pub answered: bool,
}
