//! Files referenced by chunks and contracts

use diesel::prelude::*;

use super::diesel_schema::{chunks, contracts, files};
use super::models::File;
use crate::error::NodeError;

pub fn insert_file(conn: &mut SqliteConnection, file: &File) -> Result<(), NodeError> {
    diesel::insert_into(files::table)
        .values(file)
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to insert file: {}", e)))?;
    Ok(())
}

pub fn get_file(conn: &mut SqliteConnection, hash: &str) -> Result<Option<File>, NodeError> {
    files::table
        .filter(files::hash.eq(hash))
        .select(File::as_select())
        .first(conn)
        .optional()
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn count_files(conn: &mut SqliteConnection) -> Result<i64, NodeError> {
    files::table
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

/// Delete files no chunk or contract refers to. Returns the deleted hashes.
pub fn delete_orphans(conn: &mut SqliteConnection) -> Result<Vec<String>, NodeError> {
    let orphans: Vec<String> = files::table
        .filter(files::hash.ne_all(chunks::table.select(chunks::file_hash)))
        .filter(files::hash.ne_all(contracts::table.select(contracts::file_hash)))
        .select(files::hash)
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))?;

    if orphans.is_empty() {
        return Ok(orphans);
    }

    diesel::delete(files::table.filter(files::hash.eq_any(&orphans)))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to delete orphan files: {}", e)))?;

    Ok(orphans)
}
