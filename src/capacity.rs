//! Capacity Maintainer - keeps the idle chunk inventory at its target shape
//!
//! ## Architecture
//!
//! ```text
//! CapacityMaintainer (this module)
//!     │
//!     └── every interval:
//!         1. Count idle chunks grouped by size
//!         2. Plan the missing counts per size
//!         3. Generate one chunk per missing size, largest first:
//!            seed → content hash → verifier encode → tag store → files/chunks rows
//! ```
//!
//! A failed generation is logged and picked up again on the next pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::content::{random_seed, SeededContent};
use crate::db::models::{File, NewChunk};
use crate::db::{chunks, files, NodeDb};
use crate::error::NodeError;
use crate::planner::{Distribution, Planner};
use crate::tag_store::TagStore;
use crate::verifier::Verifier;

pub struct CapacityMaintainer {
    db: Arc<NodeDb>,
    verifier: Arc<dyn Verifier>,
    tags: Arc<TagStore>,
    clock: Arc<dyn Clock>,
    planner: Planner,
    interval: Duration,
    file_interval_secs: i64,
    redundancy: i32,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl CapacityMaintainer {
    pub fn new(
        db: Arc<NodeDb>,
        verifier: Arc<dyn Verifier>,
        tags: Arc<TagStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let capacity = &config.capacity;
        Self {
            db,
            verifier,
            tags,
            clock,
            planner: Planner::new(
                capacity.min_chunk_size,
                capacity.max_chunk_size,
                capacity.total_bytes,
                capacity.base,
            ),
            interval: Duration::from_secs(capacity.interval_secs),
            file_interval_secs: config.default_interval_secs,
            redundancy: config.default_redundancy,
            shutdown_rx: None,
        }
    }

    /// Set shutdown receiver
    pub fn set_shutdown(&mut self, rx: broadcast::Receiver<()>) {
        self.shutdown_rx = Some(rx);
    }

    /// Reconcile forever, until shutdown is signalled
    pub async fn run(&mut self) {
        info!(
            min = self.planner.min_size,
            max = self.planner.max_size,
            total_bytes = self.planner.total_bytes,
            base = self.planner.base,
            "Capacity maintainer started"
        );

        loop {
            match self.reconcile_once().await {
                Ok(0) => {}
                Ok(generated) => info!(generated, "Inventory pass complete"),
                Err(e) => warn!(error = %e, "Inventory pass failed"),
            }

            let Some(rx) = self.shutdown_rx.as_mut() else {
                tokio::time::sleep(self.interval).await;
                continue;
            };
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = rx.recv() => {
                    info!("Capacity maintainer shutdown requested");
                    break;
                }
            }
        }
    }

    /// Current idle inventory as a size-keyed distribution
    pub async fn inventory(&self) -> Result<Distribution, NodeError> {
        let db = self.db.clone();
        let counts = tokio::task::spawn_blocking(move || db.with_conn(chunks::inventory_by_size))
            .await
            .map_err(join_error)??;

        Ok(Distribution::from_counts(
            counts
                .into_iter()
                .filter(|(size, _)| *size > 0)
                .map(|(size, count)| (size as u64, count)),
        ))
    }

    /// One reconcile pass. Returns the number of chunks generated, at most one
    /// per size the plan is short of.
    pub async fn reconcile_once(&self) -> Result<usize, NodeError> {
        let existing = self.inventory().await?;
        let missing = self.planner.plan(&existing)?;
        if missing.is_empty() {
            debug!(bytes = existing.total_bytes(), "Inventory at target");
            return Ok(0);
        }

        // One chunk per missing size per pass, largest first
        let sizes: Vec<u64> = missing
            .counts()
            .iter()
            .rev()
            .filter(|(_, count)| **count > 0)
            .map(|(size, _)| *size)
            .collect();
        info!(
            sizes = sizes.len(),
            missing_bytes = missing.total_bytes(),
            "Generating missing inventory"
        );

        let mut generated = 0;
        for size in sizes {
            match self.generate_chunk(size).await {
                Ok(file_hash) => {
                    generated += 1;
                    debug!(size, file_hash = %file_hash, "Generated chunk");
                }
                Err(e) => warn!(size, error = %e, "Chunk generation failed"),
            }
        }
        Ok(generated)
    }

    /// Synthesize, encode and store one chunk of `size` bytes
    pub async fn generate_chunk(&self, size: u64) -> Result<String, NodeError> {
        let seed = random_seed();

        let verifier = self.verifier.clone();
        let encode_seed = seed.clone();
        let (file_hash, tag, state) = tokio::task::spawn_blocking(move || {
            let file_hash = SeededContent::file_hash(&encode_seed, size)?;
            let (tag, state) = verifier.encode(&mut SeededContent::new(&encode_seed, size))?;
            Ok::<_, NodeError>((file_hash, tag, state))
        })
        .await
        .map_err(join_error)??;

        let tag_hash = self.tags.put(tag.as_bytes()).await?;

        let now = self.clock.now_ms();
        let file = File {
            hash: file_hash.clone(),
            size: i64::try_from(size)
                .map_err(|_| NodeError::Config(format!("chunk size {} out of range", size)))?,
            seed,
            redundancy: self.redundancy,
            interval_secs: self.file_interval_secs,
            added_at: now,
        };

        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.with_conn(|conn| {
                conn.immediate_transaction(|conn| {
                    files::insert_file(conn, &file)?;
                    chunks::insert_chunk(
                        conn,
                        &NewChunk {
                            file_hash: &file.hash,
                            state: state.as_bytes(),
                            tag_hash: &tag_hash,
                            created_at: now,
                        },
                    )
                })
            })
        })
        .await
        .map_err(join_error)??;

        Ok(file_hash)
    }
}

fn join_error(e: tokio::task::JoinError) -> NodeError {
    NodeError::Internal(format!("Blocking task failed: {}", e))
}
