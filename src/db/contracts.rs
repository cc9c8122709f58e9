//! Contract rows and the file metadata they are evaluated against

use diesel::prelude::*;

use super::diesel_schema::{contracts, files, tokens};
use super::models::{ContractProgress, ContractRow, File, NewContract};
use crate::error::NodeError;

pub fn insert_contract(conn: &mut SqliteConnection, new: &NewContract) -> Result<ContractRow, NodeError> {
    diesel::insert_into(contracts::table)
        .values(new)
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to insert contract: {}", e)))?;

    contracts::table
        .filter(contracts::token_id.eq(new.token_id))
        .filter(contracts::file_hash.eq(new.file_hash))
        .select(ContractRow::as_select())
        .first(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn get_for_token_file(
    conn: &mut SqliteConnection,
    token_id: i64,
    file_hash: &str,
) -> Result<Option<(ContractRow, File)>, NodeError> {
    contracts::table
        .inner_join(files::table)
        .filter(contracts::token_id.eq(token_id))
        .filter(contracts::file_hash.eq(file_hash))
        .select((ContractRow::as_select(), File::as_select()))
        .first(conn)
        .optional()
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

/// Contracts of a token not yet folded into its uptime summary
pub fn uncached_for_token(
    conn: &mut SqliteConnection,
    token_id: i64,
) -> Result<Vec<(ContractRow, File)>, NodeError> {
    contracts::table
        .inner_join(files::table)
        .filter(contracts::token_id.eq(token_id))
        .filter(contracts::cached.eq(false))
        .order(contracts::id.asc())
        .select((ContractRow::as_select(), File::as_select()))
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

/// Uncached contracts across every token of an address
pub fn uncached_for_address(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Vec<(ContractRow, File)>, NodeError> {
    contracts::table
        .inner_join(files::table)
        .inner_join(tokens::table)
        .filter(tokens::address.eq(address))
        .filter(contracts::cached.eq(false))
        .select((ContractRow::as_select(), File::as_select()))
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn save_progress(
    conn: &mut SqliteConnection,
    contract_id: i64,
    progress: &ContractProgress,
) -> Result<(), NodeError> {
    diesel::update(contracts::table.filter(contracts::id.eq(contract_id)))
        .set(progress)
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to update contract: {}", e)))?;
    Ok(())
}

pub fn mark_cached(conn: &mut SqliteConnection, contract_ids: &[i64]) -> Result<(), NodeError> {
    if contract_ids.is_empty() {
        return Ok(());
    }
    diesel::update(contracts::table.filter(contracts::id.eq_any(contract_ids)))
        .set(contracts::cached.eq(true))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to mark contracts cached: {}", e)))?;
    Ok(())
}

/// Settled contracts with the file interval needed to compute expiration
pub fn cached_contracts(conn: &mut SqliteConnection) -> Result<Vec<(ContractRow, File)>, NodeError> {
    contracts::table
        .inner_join(files::table)
        .filter(contracts::cached.eq(true))
        .select((ContractRow::as_select(), File::as_select()))
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn delete_contracts(conn: &mut SqliteConnection, contract_ids: &[i64]) -> Result<usize, NodeError> {
    if contract_ids.is_empty() {
        return Ok(0);
    }
    diesel::delete(contracts::table.filter(contracts::id.eq_any(contract_ids)))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to delete contracts: {}", e)))
}

pub fn count_contracts(conn: &mut SqliteConnection) -> Result<i64, NodeError> {
    contracts::table
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}
