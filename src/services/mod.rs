//! Service layer for audit-node
//!
//! Services hold the node's operations between HTTP handlers and the
//! repositories. They own transaction boundaries and input validation.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (tokens, contracts, status)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod contract_service;
pub mod response;
pub mod status_service;
pub mod token_service;

pub use contract_service::ContractService;
pub use response::*;
pub use status_service::{StatusQuery, StatusService};
pub use token_service::TokenService;

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::clock::Clock;
use crate::config::Config;
use crate::db::NodeDb;
use crate::geo::Geolocator;
use crate::tag_store::TagStore;
use crate::verifier::Verifier;

/// Service container for dependency injection
///
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub tokens: Arc<TokenService>,
    pub contracts: Arc<ContractService>,
    pub status: Arc<StatusService>,
    pub db: Arc<NodeDb>,
}

impl Services {
    pub fn new(
        db: Arc<NodeDb>,
        verifier: Arc<dyn Verifier>,
        geolocator: Arc<dyn Geolocator>,
        tags: Arc<TagStore>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(config.max_tokens_per_ip, geolocator));

        Self {
            tokens: Arc::new(TokenService::new(
                db.clone(),
                verifier.clone(),
                admission.clone(),
                clock.clone(),
                config.clone(),
            )),
            contracts: Arc::new(ContractService::new(
                db.clone(),
                verifier,
                admission,
                tags,
                clock.clone(),
                config,
            )),
            status: Arc::new(StatusService::new(db.clone(), clock)),
            db,
        }
    }
}
