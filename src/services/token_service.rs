//! Token service - farmer session issuance and teardown

use std::sync::Arc;

use diesel::prelude::*;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::admission::AdmissionController;
use crate::clock::Clock;
use crate::config::Config;
use crate::db::models::{NewToken, Token};
use crate::db::{tokens, NodeDb};
use crate::error::NodeError;
use crate::verifier::Verifier;
use crate::whitelist;

/// Bytes of randomness in a token
const TOKEN_BYTES: usize = 16;
/// Hex characters of the token digest kept as the public farmer id
const FARMER_ID_LEN: usize = 20;

/// Returned to a farmer when a token is created
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub farmer_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub heartbeat: serde_json::Value,
}

/// Verifier parameters a farmer needs to answer challenges
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub kind: String,
    pub heartbeat: serde_json::Value,
}

pub struct TokenService {
    db: Arc<NodeDb>,
    verifier: Arc<dyn Verifier>,
    admission: Arc<AdmissionController>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl TokenService {
    pub fn new(
        db: Arc<NodeDb>,
        verifier: Arc<dyn Verifier>,
        admission: Arc<AdmissionController>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            verifier,
            admission,
            clock,
            config,
        }
    }

    /// Issue a new token for `address` to a farmer at `ip`.
    ///
    /// Eligibility, quota and insert run in one immediate transaction so two
    /// concurrent requests from one IP cannot both squeeze under the quota.
    pub fn create_token(
        &self,
        address: &str,
        ip: &str,
        message: Option<&str>,
        signature: Option<&str>,
    ) -> Result<IssuedToken, NodeError> {
        if let Some(message) = message {
            if message.len() > self.config.max_sig_message_size {
                return Err(NodeError::InvalidParameter(format!(
                    "Signature message too long, maximum is {} bytes",
                    self.config.max_sig_message_size
                )));
            }
        }

        let location_json = serde_json::to_string(&self.admission.locate(ip))?;
        let now = self.clock.now_ms();

        let token = self.db.with_conn(|conn| {
            conn.immediate_transaction(|conn| {
                // IP quota before the address, so a full IP is told so first
                self.admission.assert_may_issue(conn, ip)?;
                whitelist::assert_eligible(conn, address, self.config.min_balance)?;

                let (token, farmer_id) = generate_token();
                tokens::insert_token(
                    conn,
                    &NewToken {
                        token: &token,
                        address,
                        ip_address: ip,
                        location_json: Some(location_json.clone()),
                        farmer_id: &farmer_id,
                        heartbeat_count: 0,
                        message,
                        signature,
                        cache_uptime_ms: 0,
                        created_at: now,
                    },
                )
            })
        })?;

        info!(farmer_id = %token.farmer_id, address = %address, ip = %ip, "Issued token");

        Ok(IssuedToken {
            token: token.token,
            farmer_id: token.farmer_id,
            kind: self.verifier.kind().to_string(),
            heartbeat: self.verifier.public_params(),
        })
    }

    /// Delete a token and every contract it holds
    pub fn delete_token(&self, token: &str) -> Result<(), NodeError> {
        let deleted = self.db.with_conn(|conn| tokens::delete_token(conn, token))?;
        if !deleted {
            return Err(nonexistent_token());
        }
        info!(token = %token, "Deleted token");
        Ok(())
    }

    pub fn heartbeat(&self, token: &str) -> Result<Heartbeat, NodeError> {
        let token = self.db.with_conn(|conn| lookup_token(conn, token))?;
        debug!(farmer_id = %token.farmer_id, "Heartbeat requested");
        Ok(Heartbeat {
            kind: self.verifier.kind().to_string(),
            heartbeat: self.verifier.public_params(),
        })
    }
}

/// Fetch a token or fail with the farmer-facing not-found error
pub fn lookup_token(conn: &mut SqliteConnection, token: &str) -> Result<Token, NodeError> {
    tokens::get_by_token(conn, token)?.ok_or_else(nonexistent_token)
}

fn nonexistent_token() -> NodeError {
    NodeError::NotFound("Nonexistent token.".to_string())
}

/// Random hex token and the public farmer id derived from it
fn generate_token() -> (String, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let farmer_id = hex::encode(Sha256::digest(bytes))[..FARMER_ID_LEN].to_string();
    (hex::encode(bytes), farmer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::addresses::upsert_address;
    use crate::geo::NullGeolocator;
    use crate::verifier::DigestVerifier;

    fn address() -> String {
        bs58::encode([5u8; 21]).with_check().into_string()
    }

    fn service(max_tokens_per_ip: Option<u32>) -> TokenService {
        let db = Arc::new(NodeDb::open_in_memory().unwrap());
        db.with_conn(|conn| upsert_address(conn, &address(), 20_000)).unwrap();

        let mut config = Config::default();
        config.max_tokens_per_ip = max_tokens_per_ip;
        TokenService::new(
            db,
            Arc::new(DigestVerifier::new([0u8; 32], 4)),
            Arc::new(AdmissionController::new(max_tokens_per_ip, Arc::new(NullGeolocator))),
            Arc::new(ManualClock::new(0)),
            Arc::new(config),
        )
    }

    #[test]
    fn test_token_shape() {
        let (token, farmer_id) = generate_token();
        assert_eq!(token.len(), 32);
        assert_eq!(farmer_id.len(), 20);
        let bytes = hex::decode(&token).unwrap();
        assert_eq!(farmer_id, &hex::encode(Sha256::digest(&bytes))[..20]);
    }

    #[test]
    fn test_third_token_from_same_ip_is_denied() {
        let svc = service(Some(2));
        svc.create_token(&address(), "9.9.9.9", None, None).unwrap();
        svc.create_token(&address(), "9.9.9.9", None, None).unwrap();

        let err = svc.create_token(&address(), "9.9.9.9", None, None).unwrap_err();
        assert!(matches!(err, NodeError::AdmissionDenied(_)));
        assert_eq!(
            err.client_message(),
            "IP Disallowed, only 2 tokens are permitted per IP address"
        );
    }

    #[test]
    fn test_full_ip_is_reported_before_bad_address() {
        let svc = service(Some(1));
        svc.create_token(&address(), "8.8.8.8", None, None).unwrap();

        let err = svc.create_token("bogus", "8.8.8.8", None, None).unwrap_err();
        assert!(matches!(err, NodeError::AdmissionDenied(_)));

        // A fresh IP still gets the address error
        let err = svc.create_token("bogus", "8.8.4.4", None, None).unwrap_err();
        assert!(matches!(err, NodeError::InvalidParameter(_)));
    }

    #[test]
    fn test_create_rejects_bad_inputs() {
        let svc = service(Some(5));

        let long = "x".repeat(2000);
        assert!(matches!(
            svc.create_token(&address(), "1.1.1.1", Some(&long), None),
            Err(NodeError::InvalidParameter(_))
        ));
        assert!(matches!(
            svc.create_token("bogus", "1.1.1.1", None, None),
            Err(NodeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_delete_and_heartbeat() {
        let svc = service(Some(5));
        let issued = svc.create_token(&address(), "1.1.1.1", Some("hello"), Some("sig")).unwrap();
        assert_eq!(issued.kind, "digest-sha256");

        let hb = svc.heartbeat(&issued.token).unwrap();
        assert_eq!(hb.kind, "digest-sha256");

        svc.delete_token(&issued.token).unwrap();
        assert!(matches!(svc.heartbeat(&issued.token), Err(NodeError::NotFound(_))));
        assert!(matches!(svc.delete_token(&issued.token), Err(NodeError::NotFound(_))));
    }
}
