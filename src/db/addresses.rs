//! Whitelisted owner addresses

use diesel::prelude::*;

use super::diesel_schema::addresses;
use super::models::Address;
use crate::error::NodeError;

pub fn get_address(conn: &mut SqliteConnection, address: &str) -> Result<Option<Address>, NodeError> {
    addresses::table
        .filter(addresses::address.eq(address))
        .select(Address::as_select())
        .first(conn)
        .optional()
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

/// Insert or refresh the balance of an address
pub fn upsert_address(conn: &mut SqliteConnection, address: &str, balance: i64) -> Result<(), NodeError> {
    diesel::insert_into(addresses::table)
        .values(&Address {
            address: address.to_string(),
            balance,
        })
        .on_conflict(addresses::address)
        .do_update()
        .set(addresses::balance.eq(balance))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to upsert address: {}", e)))?;
    Ok(())
}

pub fn count_addresses(conn: &mut SqliteConnection) -> Result<i64, NodeError> {
    addresses::table
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}
