//! Owner address validation and whitelist import

use std::io::BufRead;

use diesel::SqliteConnection;
use tracing::{info, warn};

use crate::db::addresses;
use crate::error::NodeError;

/// Reject strings that are not base58check encoded
pub fn validate_address(address: &str) -> Result<(), NodeError> {
    bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map(|_| ())
        .map_err(|_| {
            NodeError::InvalidParameter(
                "Invalid address given: address is not a valid address.".to_string(),
            )
        })
}

/// Address must be well formed, known, and hold at least `min_balance`
pub fn assert_eligible(
    conn: &mut SqliteConnection,
    address: &str,
    min_balance: i64,
) -> Result<(), NodeError> {
    validate_address(address)?;

    match addresses::get_address(conn, address)? {
        Some(row) if row.balance >= min_balance => Ok(()),
        _ => Err(NodeError::InvalidParameter(
            "Invalid address given: address must be in whitelist.".to_string(),
        )),
    }
}

/// Upsert `address,balance` lines. Blank lines, a header row and malformed
/// lines are skipped. Returns the number of addresses written.
pub fn import_csv<R: BufRead>(conn: &mut SqliteConnection, reader: R) -> Result<usize, NodeError> {
    let mut imported = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(',').map(str::trim);
        let (Some(address), Some(balance)) = (fields.next(), fields.next()) else {
            warn!(line = line_no + 1, "Skipping whitelist line without a balance");
            continue;
        };

        let balance: i64 = match balance.parse() {
            Ok(b) => b,
            Err(_) if line_no == 0 => continue,
            Err(_) => {
                warn!(line = line_no + 1, balance = %balance, "Skipping whitelist line with bad balance");
                continue;
            }
        };

        if validate_address(address).is_err() {
            warn!(line = line_no + 1, address = %address, "Skipping invalid address");
            continue;
        }

        addresses::upsert_address(conn, address, balance)?;
        imported += 1;
    }

    info!(imported, "Imported whitelist");
    Ok(imported)
}
