//! Garbage collection of settled contracts, orphan files and their tags
//!
//! A contract folded into its token's uptime summary is kept for
//! `gc.retention_secs` past its expiration, then deleted. Files that no chunk
//! or contract refers to go next, followed by tags nothing refers to.

use std::sync::Arc;
use std::time::Duration;

use diesel::SqliteConnection;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::GcConfig;
use crate::db::{chunks, contracts, files, NodeDb};
use crate::error::NodeError;
use crate::lifecycle::Contract;
use crate::tag_store::TagStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub contracts: usize,
    pub files: usize,
    pub tags: usize,
}

pub struct GarbageCollector {
    db: Arc<NodeDb>,
    tags: Arc<TagStore>,
    clock: Arc<dyn Clock>,
    retention_ms: i64,
    interval: Duration,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl GarbageCollector {
    pub fn new(db: Arc<NodeDb>, tags: Arc<TagStore>, clock: Arc<dyn Clock>, config: &GcConfig) -> Self {
        Self {
            db,
            tags,
            clock,
            retention_ms: config.retention_secs.saturating_mul(1000),
            interval: Duration::from_secs(config.interval_secs),
            shutdown_rx: None,
        }
    }

    /// Set shutdown receiver
    pub fn set_shutdown(&mut self, rx: broadcast::Receiver<()>) {
        self.shutdown_rx = Some(rx);
    }

    pub async fn run(&mut self) {
        loop {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Garbage collection pass failed");
            }

            let Some(rx) = self.shutdown_rx.as_mut() else {
                tokio::time::sleep(self.interval).await;
                continue;
            };
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = rx.recv() => {
                    info!("Garbage collector shutdown requested");
                    break;
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<GcReport, NodeError> {
        let cutoff = self.clock.now_ms().saturating_sub(self.retention_ms);

        let db = self.db.clone();
        let (deleted_contracts, deleted_files, candidate_tags) =
            tokio::task::spawn_blocking(move || {
                db.with_conn(|conn| {
                    conn.immediate_transaction(|conn| {
                        let mut ids = Vec::new();
                        let mut tag_hashes = Vec::new();
                        for (row, file) in contracts::cached_contracts(conn)? {
                            let contract = Contract::from_row(row, &file);
                            if contract.expiration() < cutoff {
                                ids.push(contract.id);
                                tag_hashes.push(contract.tag_hash);
                            }
                        }

                        let deleted = contracts::delete_contracts(conn, &ids)?;
                        let orphans = files::delete_orphans(conn)?;
                        let unreferenced = unreferenced_tags(conn, tag_hashes)?;
                        Ok::<_, NodeError>((deleted, orphans.len(), unreferenced))
                    })
                })
            })
            .await
            .map_err(|e| NodeError::Internal(format!("Blocking task failed: {}", e)))??;

        let tags = self.delete_tags(&candidate_tags).await;

        let report = GcReport {
            contracts: deleted_contracts,
            files: deleted_files,
            tags,
        };
        if report == GcReport::default() {
            debug!("Nothing to collect");
        } else {
            info!(
                contracts = report.contracts,
                files = report.files,
                tags = report.tags,
                "Garbage collected"
            );
        }
        Ok(report)
    }

    /// Drop the whole idle inventory, for operators rebuilding it
    pub async fn clear_inventory(&self) -> Result<GcReport, NodeError> {
        let db = self.db.clone();
        let (cleared, orphan_files, candidate_tags) = tokio::task::spawn_blocking(move || {
            db.with_conn(|conn| {
                conn.immediate_transaction(|conn| {
                    let tag_hashes = chunks::clear_chunks(conn)?;
                    let cleared = tag_hashes.len();
                    let orphans = files::delete_orphans(conn)?;
                    let unreferenced = unreferenced_tags(conn, tag_hashes)?;
                    Ok::<_, NodeError>((cleared, orphans.len(), unreferenced))
                })
            })
        })
        .await
        .map_err(|e| NodeError::Internal(format!("Blocking task failed: {}", e)))??;

        let tags = self.delete_tags(&candidate_tags).await;
        info!(chunks = cleared, files = orphan_files, tags, "Cleared chunk inventory");

        Ok(GcReport {
            contracts: 0,
            files: orphan_files,
            tags,
        })
    }

    async fn delete_tags(&self, hashes: &[String]) -> usize {
        let mut deleted = 0;
        for hash in hashes {
            match self.tags.delete(hash).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(hash = %hash, error = %e, "Failed to delete tag"),
            }
        }
        deleted
    }
}

fn unreferenced_tags(
    conn: &mut SqliteConnection,
    mut hashes: Vec<String>,
) -> Result<Vec<String>, NodeError> {
    hashes.sort();
    hashes.dedup();

    let mut unreferenced = Vec::new();
    for hash in hashes {
        if !chunks::tag_referenced(conn, &hash)? {
            unreferenced.push(hash);
        }
    }
    Ok(unreferenced)
}
