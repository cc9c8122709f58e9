//! Audit Node - proof-of-storage verification for farmer clients
//!
//! Farmers request tokens, receive pre-tagged chunks, and answer one
//! challenge per chunk per interval. The node tracks each farmer's contracts
//! and reports how much of the time they held at least one live contract.
//!
//! ## Architecture
//!
//! - **Contract lifecycle** (`lifecycle`): issue → renew → answer → expire
//! - **Uptime** (`uptime`): interval-union sweep with an incremental summary
//! - **Capacity** (`planner`, `capacity`): keeps idle chunk inventory at a
//!   target size distribution
//! - **Admission** (`admission`, `whitelist`): per-IP token quota and owner checks
//! - **Verifier** (`verifier`): pluggable proof scheme, opaque to the node
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/audit-node/
//! ├── audit-node.db          # SQLite (addresses, tokens, files, chunks, contracts)
//! ├── tags/                  # Content-addressed verifier tags
//! │   └── ab/cd/sha256-abcd...
//! ├── verifier.key           # Digest verifier secret
//! └── config.toml            # Configuration
//! ```

pub mod admission;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod gc;
pub mod geo;
pub mod http;
pub mod lifecycle;
pub mod planner;
pub mod services;
pub mod tag_store;
pub mod uptime;
pub mod verifier;
pub mod whitelist;

// Re-exports
pub use capacity::CapacityMaintainer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::NodeDb;
pub use error::{NodeError, VerifierError};
pub use gc::GarbageCollector;
pub use geo::{Geolocator, NullGeolocator, TableGeolocator};
pub use http::HttpServer;
pub use services::Services;
pub use tag_store::TagStore;
pub use verifier::{DigestVerifier, Verifier};
