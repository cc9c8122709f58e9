//! Farmer tokens

use diesel::prelude::*;

use super::diesel_schema::tokens;
use super::models::{NewToken, Token};
use crate::error::NodeError;
use crate::uptime::UptimeSummary;

pub fn insert_token(conn: &mut SqliteConnection, new: &NewToken) -> Result<Token, NodeError> {
    diesel::insert_into(tokens::table)
        .values(new)
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to insert token: {}", e)))?;

    get_by_token(conn, new.token)?
        .ok_or_else(|| NodeError::Internal("Token vanished after insert".into()))
}

pub fn get_by_token(conn: &mut SqliteConnection, token: &str) -> Result<Option<Token>, NodeError> {
    tokens::table
        .filter(tokens::token.eq(token))
        .select(Token::as_select())
        .first(conn)
        .optional()
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn get_by_farmer_id(conn: &mut SqliteConnection, farmer_id: &str) -> Result<Option<Token>, NodeError> {
    tokens::table
        .filter(tokens::farmer_id.eq(farmer_id))
        .select(Token::as_select())
        .first(conn)
        .optional()
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn list_tokens(conn: &mut SqliteConnection) -> Result<Vec<Token>, NodeError> {
    tokens::table
        .order(tokens::id.asc())
        .select(Token::as_select())
        .load(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn count_tokens(conn: &mut SqliteConnection) -> Result<i64, NodeError> {
    tokens::table
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn count_by_ip(conn: &mut SqliteConnection, ip_address: &str) -> Result<i64, NodeError> {
    tokens::table
        .filter(tokens::ip_address.eq(ip_address))
        .count()
        .get_result(conn)
        .map_err(|e| NodeError::Internal(format!("Query failed: {}", e)))
}

pub fn update_ip(
    conn: &mut SqliteConnection,
    token_id: i64,
    ip_address: &str,
    location_json: Option<String>,
) -> Result<(), NodeError> {
    diesel::update(tokens::table.filter(tokens::id.eq(token_id)))
        .set((
            tokens::ip_address.eq(ip_address),
            tokens::location_json.eq(location_json),
        ))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to update token ip: {}", e)))?;
    Ok(())
}

pub fn increment_heartbeat(conn: &mut SqliteConnection, token_id: i64) -> Result<(), NodeError> {
    diesel::update(tokens::table.filter(tokens::id.eq(token_id)))
        .set(tokens::heartbeat_count.eq(tokens::heartbeat_count + 1))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to increment heartbeat: {}", e)))?;
    Ok(())
}

pub fn save_uptime_summary(
    conn: &mut SqliteConnection,
    token_id: i64,
    summary: &UptimeSummary,
) -> Result<(), NodeError> {
    diesel::update(tokens::table.filter(tokens::id.eq(token_id)))
        .set((
            tokens::cache_start.eq(summary.start),
            tokens::cache_end.eq(summary.end),
            tokens::cache_uptime_ms.eq(summary.uptime_ms),
        ))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to save uptime summary: {}", e)))?;
    Ok(())
}

/// Delete a token. Its contracts go with it.
pub fn delete_token(conn: &mut SqliteConnection, token: &str) -> Result<bool, NodeError> {
    let deleted = diesel::delete(tokens::table.filter(tokens::token.eq(token)))
        .execute(conn)
        .map_err(|e| NodeError::Internal(format!("Failed to delete token: {}", e)))?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::addresses::upsert_address;
    use crate::db::schema::init_schema;
    use diesel::connection::SimpleConnection;

    fn setup_test_db() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        conn.batch_execute("PRAGMA foreign_keys = ON").unwrap();
        init_schema(&mut conn).unwrap();
        upsert_address(&mut conn, "addr1", 50_000).unwrap();
        conn
    }

    fn new_token<'a>(token: &'a str, farmer_id: &'a str, ip: &'a str) -> NewToken<'a> {
        NewToken {
            token,
            address: "addr1",
            ip_address: ip,
            location_json: None,
            farmer_id,
            heartbeat_count: 0,
            message: None,
            signature: None,
            cache_uptime_ms: 0,
            created_at: 1_000,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut conn = setup_test_db();
        let token = insert_token(&mut conn, &new_token("t1", "f1", "1.1.1.1")).unwrap();

        assert_eq!(token.heartbeat_count, 0);
        assert_eq!(get_by_farmer_id(&mut conn, "f1").unwrap().unwrap().id, token.id);
        assert_eq!(count_by_ip(&mut conn, "1.1.1.1").unwrap(), 1);
        assert_eq!(count_by_ip(&mut conn, "2.2.2.2").unwrap(), 0);
    }

    #[test]
    fn test_heartbeat_and_summary_updates() {
        let mut conn = setup_test_db();
        let token = insert_token(&mut conn, &new_token("t1", "f1", "1.1.1.1")).unwrap();

        increment_heartbeat(&mut conn, token.id).unwrap();
        increment_heartbeat(&mut conn, token.id).unwrap();
        save_uptime_summary(
            &mut conn,
            token.id,
            &UptimeSummary {
                start: Some(10),
                end: Some(20),
                uptime_ms: 5,
            },
        )
        .unwrap();

        let token = get_by_token(&mut conn, "t1").unwrap().unwrap();
        assert_eq!(token.heartbeat_count, 2);
        assert_eq!(token.cache_start, Some(10));
        assert_eq!(token.cache_end, Some(20));
        assert_eq!(token.cache_uptime_ms, 5);
    }

    #[test]
    fn test_delete_token() {
        let mut conn = setup_test_db();
        insert_token(&mut conn, &new_token("t1", "f1", "1.1.1.1")).unwrap();

        assert!(delete_token(&mut conn, "t1").unwrap());
        assert!(!delete_token(&mut conn, "t1").unwrap());
        assert!(get_by_token(&mut conn, "t1").unwrap().is_none());
    }
}
