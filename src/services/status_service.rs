//! Farmer status - uptime settlement and listing

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use diesel::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::db::models::Token;
use crate::db::{contracts, tokens, NodeDb};
use crate::error::NodeError;
use crate::geo::Location;
use crate::lifecycle::Contract;
use crate::uptime::{self, ContractSpan, UptimeSummary};

/// Column a status listing is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Id,
    Address,
    Heartbeats,
    Contracts,
    Size,
    Online,
    Uptime,
}

impl FromStr for SortKey {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortKey::Id),
            "address" => Ok(SortKey::Address),
            "heartbeats" => Ok(SortKey::Heartbeats),
            "contracts" => Ok(SortKey::Contracts),
            "size" => Ok(SortKey::Size),
            "online" => Ok(SortKey::Online),
            "uptime" => Ok(SortKey::Uptime),
            _ => Err(NodeError::InvalidParameter("Invalid sort.".to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    pub online_only: bool,
    pub sort: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
    /// Zero-based page of `limit` entries
    pub page: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FarmerStatus {
    pub id: String,
    pub address: String,
    pub location: Location,
    /// Fraction of observed time spent online
    pub uptime: f64,
    pub heartbeats: i64,
    /// Live contracts
    pub contracts: usize,
    /// Bytes under live contracts
    pub size: i64,
    pub online: bool,
}

impl FarmerStatus {
    fn compare(&self, other: &Self, key: SortKey) -> Ordering {
        match key {
            SortKey::Id => Ordering::Equal,
            SortKey::Address => self.address.cmp(&other.address),
            SortKey::Heartbeats => self.heartbeats.cmp(&other.heartbeats),
            SortKey::Contracts => self.contracts.cmp(&other.contracts),
            SortKey::Size => self.size.cmp(&other.size),
            SortKey::Online => self.online.cmp(&other.online),
            SortKey::Uptime => self.uptime.total_cmp(&other.uptime),
        }
        .then_with(|| self.id.cmp(&other.id))
    }
}

pub struct StatusService {
    db: Arc<NodeDb>,
    clock: Arc<dyn Clock>,
}

impl StatusService {
    pub fn new(db: Arc<NodeDb>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn list(&self, query: &StatusQuery) -> Result<Vec<FarmerStatus>, NodeError> {
        let key = match query.sort.as_deref() {
            Some(sort) => sort.parse()?,
            None => SortKey::default(),
        };
        let now = self.clock.now_ms();

        let mut entries = self.db.with_conn(|conn| {
            let mut entries = Vec::new();
            for token in tokens::list_tokens(conn)? {
                let status = settle_token(conn, &token, now)?;
                if !query.online_only || status.online {
                    entries.push(status);
                }
            }
            Ok(entries)
        })?;

        entries.sort_by(|a, b| {
            let ord = a.compare(b, key);
            if query.descending {
                ord.reverse()
            } else {
                ord
            }
        });

        if let Some(limit) = query.limit {
            entries = entries
                .into_iter()
                .skip(query.page.saturating_mul(limit))
                .take(limit)
                .collect();
        }
        Ok(entries)
    }

    pub fn show(&self, farmer_id: &str) -> Result<FarmerStatus, NodeError> {
        let now = self.clock.now_ms();
        self.db.with_conn(|conn| {
            let token = tokens::get_by_farmer_id(conn, farmer_id)?
                .ok_or_else(|| NodeError::NotFound("Nonexistent farmer id.".to_string()))?;
            settle_token(conn, &token, now)
        })
    }
}

/// Fold a token's uncached contracts into its uptime summary and report it.
fn settle_token(conn: &mut SqliteConnection, token: &Token, now: i64) -> Result<FarmerStatus, NodeError> {
    conn.immediate_transaction(|conn| {
        // Re-read inside the lock so concurrent settlements never lose a pass
        let token = tokens::get_by_token(conn, &token.token)?
            .ok_or_else(|| NodeError::NotFound("Nonexistent farmer id.".to_string()))?;

        let mut spans = Vec::new();
        let mut live = 0usize;
        let mut live_bytes = 0i64;
        for (row, file) in contracts::uncached_for_token(conn, token.id)? {
            let contract = Contract::from_row(row, &file);
            if contract.is_live(now) {
                live += 1;
                live_bytes += file.size;
            }
            spans.push(ContractSpan {
                id: contract.id,
                start: contract.start,
                expiration: contract.expiration(),
            });
        }

        let summary = UptimeSummary {
            start: token.cache_start,
            end: token.cache_end,
            uptime_ms: token.cache_uptime_ms,
        };
        let settlement = uptime::settle(&summary, &spans, now);

        contracts::mark_cached(conn, &settlement.newly_cached)?;
        tokens::save_uptime_summary(conn, token.id, &settlement.summary)?;

        debug!(
            farmer_id = %token.farmer_id,
            elapsed_ms = settlement.elapsed_ms,
            cached = settlement.newly_cached.len(),
            "Settled uptime"
        );

        Ok(FarmerStatus {
            location: token.location(),
            id: token.farmer_id,
            address: token.address,
            uptime: settlement.summary.fraction(),
            heartbeats: token.heartbeat_count,
            contracts: live,
            size: live_bytes,
            online: live > 0,
        })
    })
}
