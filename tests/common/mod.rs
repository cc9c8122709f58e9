//! Shared fixture for integration tests: a node on a temp directory with a
//! manual clock and a small stocked inventory.

#![allow(dead_code)]

use std::io::Read;
use std::sync::Arc;

use audit_node::content::SeededContent;
use audit_node::db::addresses::upsert_address;
use audit_node::services::contract_service::ChunkGrant;
use audit_node::verifier::{Challenge, Proof};
use audit_node::{
    CapacityMaintainer, Clock, Config, DigestVerifier, ManualClock, NodeDb, NullGeolocator,
    Services, TagStore, Verifier,
};
use tempfile::TempDir;

pub const T0: i64 = 1_700_000_000_000;

pub struct TestNode {
    pub services: Arc<Services>,
    pub maintainer: CapacityMaintainer,
    pub clock: Arc<ManualClock>,
    pub config: Arc<Config>,
    pub _dir: TempDir,
}

pub fn address(n: u8) -> String {
    bs58::encode([n; 21]).with_check().into_string()
}

/// Node whose inventory plan spans `[min, max]` and totals `total_bytes`
pub async fn node(min: u64, max: u64, total_bytes: u64) -> TestNode {
    node_with(min, max, total_bytes, |_| {}).await
}

pub async fn node_with<F: FnOnce(&mut Config)>(min: u64, max: u64, total_bytes: u64, tweak: F) -> TestNode {
    let dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.storage_dir = dir.path().to_path_buf();
    config.capacity.min_chunk_size = min;
    config.capacity.max_chunk_size = max;
    config.capacity.total_bytes = total_bytes;
    config.default_interval_secs = 300;
    tweak(&mut config);
    let config = Arc::new(config);

    let db = Arc::new(NodeDb::open(&config.db_path()).unwrap());
    for n in 0..4 {
        db.with_conn(|conn| upsert_address(conn, &address(n), 50_000)).unwrap();
    }

    let tags = Arc::new(TagStore::new(config.tags_dir()).await.unwrap());
    let clock = Arc::new(ManualClock::new(T0));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let verifier: Arc<dyn Verifier> = Arc::new(DigestVerifier::new([7u8; 32], 8));

    let maintainer =
        CapacityMaintainer::new(db.clone(), verifier.clone(), tags.clone(), dyn_clock.clone(), &config);

    let services = Arc::new(Services::new(
        db,
        verifier,
        Arc::new(NullGeolocator),
        tags,
        dyn_clock,
        config.clone(),
    ));

    TestNode {
        services,
        maintainer,
        clock,
        config,
        _dir: dir,
    }
}

/// What an honest farmer sends back for `challenge` on `chunk`
pub fn honest_proof(chunk: &ChunkGrant, challenge: &Challenge) -> Proof {
    let mut content = Vec::new();
    SeededContent::new(&chunk.seed, chunk.size as u64)
        .read_to_end(&mut content)
        .unwrap();
    DigestVerifier::prove(challenge, &content).unwrap()
}

pub fn proof_item(file_hash: &str, proof: &Proof) -> serde_json::Value {
    serde_json::json!({ "file_hash": file_hash, "proof": proof.to_base64() })
}
