//! Idle chunk inventory
//!
//! A chunk row exists only until it is assigned. [`pop_largest_fitting`]
//! reads and deletes in one go and must run inside an immediate transaction
//! so SQLite's writer lock keeps two requests from taking the same row.

use diesel::dsl::count_star;
use diesel::prelude::*;

use super::diesel_schema::{chunks, contracts, files};
use super::models::{Chunk, File, NewChunk};
use crate::error::NodeError;

pub fn insert_chunk(conn: &mut SqliteConnection, chunk: &NewChunk) -> Result<(), NodeError> {
    diesel::insert_into(chunks::table)
        .values(chunk)
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to insert chunk: {}", e)))?;
    Ok(())
}

/// Idle chunk counts grouped by file size
pub fn inventory_by_size(conn: &mut SqliteConnection) -> Result<Vec<(i64, i64)>, NodeError> {
    chunks::table
        .inner_join(files::table)
        .group_by(files::size)
        .select((files::size, count_star()))
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

/// Take the largest chunk no bigger than `max_size` that `token_id` does
/// not already hold a contract for.
pub fn pop_largest_fitting(
    conn: &mut SqliteConnection,
    token_id: i64,
    max_size: i64,
) -> Result<Option<(Chunk, File)>, NodeError> {
    let held = contracts::table
        .filter(contracts::token_id.eq(token_id))
        .select(contracts::file_hash);

    let found: Option<(Chunk, File)> = chunks::table
        .inner_join(files::table)
        .filter(files::size.le(max_size))
        .filter(files::hash.ne_all(held))
        .order((files::size.desc(), chunks::id.asc()))
        .select((Chunk::as_select(), File::as_select()))
        .first(conn)
        .optional()
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))?;

    if let Some((chunk, _)) = &found {
        diesel::delete(chunks::table.filter(chunks::id.eq(chunk.id)))
            .execute(conn)
            .map_err(|e| NodeError::Internal(format!("Failed to delete chunk: {}", e)))?;
    }

    Ok(found)
}

pub fn count_chunks(conn: &mut SqliteConnection) -> Result<i64, NodeError> {
    chunks::table
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

/// Drop all idle inventory. Returns the tag hashes that were referenced.
pub fn clear_chunks(conn: &mut SqliteConnection) -> Result<Vec<String>, NodeError> {
    let tags: Vec<String> = chunks::table
        .select(chunks::tag_hash)
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))?;

    diesel::delete(chunks::table)
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to clear chunks: {}", e)))?;

    Ok(tags)
}

/// Whether any chunk or contract still refers to `tag_hash`
pub fn tag_referenced(conn: &mut SqliteConnection, tag_hash: &str) -> Result<bool, NodeError> {
    let in_chunks: i64 = chunks::table
        .filter(chunks::tag_hash.eq(tag_hash))
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))?;
    if in_chunks > 0 {
        return Ok(true);
    }

    let in_contracts: i64 = contracts::table
        .filter(contracts::tag_hash.eq(tag_hash))
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))?;
    Ok(in_contracts > 0)
}
