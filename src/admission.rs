//! Per-IP token quota and geolocation.

use std::sync::Arc;

use diesel::SqliteConnection;
use tracing::{info, warn};

use crate::db::models::Token;
use crate::db::tokens;
use crate::error::NodeError;
use crate::geo::{Geolocator, Location};

pub struct AdmissionController {
    max_tokens_per_ip: Option<u32>,
    geolocator: Arc<dyn Geolocator>,
}

impl AdmissionController {
    pub fn new(max_tokens_per_ip: Option<u32>, geolocator: Arc<dyn Geolocator>) -> Self {
        Self {
            max_tokens_per_ip,
            geolocator,
        }
    }

    /// Deny when `ip` already holds the maximum number of tokens
    pub fn assert_may_issue(&self, conn: &mut SqliteConnection, ip: &str) -> Result<(), NodeError> {
        let Some(max) = self.max_tokens_per_ip else {
            return Ok(());
        };

        let existing = tokens::count_by_ip(conn, ip)?;
        if existing >= i64::from(max) {
            warn!(ip = %ip, existing, max, "Token quota reached for IP");
            return Err(NodeError::AdmissionDenied(format!(
                "IP Disallowed, only {} tokens are permitted per IP address",
                max
            )));
        }
        Ok(())
    }

    /// Handle a request for `token` arriving from `observed_ip`.
    ///
    /// A different address must pass the quota check as if it were asking for
    /// a new token. The token only migrates to the new address when
    /// `allow_change` is set.
    pub fn reconcile_ip(
        &self,
        conn: &mut SqliteConnection,
        token: &Token,
        observed_ip: &str,
        allow_change: bool,
    ) -> Result<(), NodeError> {
        if token.ip_address == observed_ip {
            return Ok(());
        }

        self.assert_may_issue(conn, observed_ip)?;

        if allow_change {
            let location = self.locate(observed_ip);
            tokens::update_ip(conn, token.id, observed_ip, Some(serde_json::to_string(&location)?))?;
            info!(
                farmer_id = %token.farmer_id,
                from = %token.ip_address,
                to = %observed_ip,
                "Token moved to new IP"
            );
        }
        Ok(())
    }

    pub fn locate(&self, ip: &str) -> Location {
        self.geolocator.lookup(ip)
    }
}
