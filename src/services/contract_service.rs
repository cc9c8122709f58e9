//! Contract service - chunk issuance, challenge polling and proof submission
//!
//! Every contract read-modify-write runs inside an immediate transaction, so
//! renew and answer on the same contract are totally ordered. Chunk pops use
//! the same mechanism and never hand one chunk to two farmers.

use std::sync::Arc;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::token_service::lookup_token;
use crate::admission::AdmissionController;
use crate::clock::Clock;
use crate::config::Config;
use crate::db::models::{File, NewContract};
use crate::db::{chunks, contracts, tokens, NodeDb};
use crate::error::NodeError;
use crate::lifecycle::{self, Contract, Renewal};
use crate::tag_store::TagStore;
use crate::verifier::{Challenge, Proof, State, Verifier};

/// Parsed proofs buffered between the body parser and verification
const PIPELINE_DEPTH: usize = 16;

/// One chunk handed to a farmer
#[derive(Debug, Clone, Serialize)]
pub struct ChunkGrant {
    pub file_hash: String,
    pub seed: String,
    pub size: i64,
    pub challenge: Challenge,
    /// Base64 verifier tag
    pub tag: String,
    /// Seconds until the first proof is due
    pub due: i64,
    pub due_at: i64,
    pub interval: i64,
}

/// Result of the blocking half of issuance, before tags are attached
#[derive(Debug, Clone)]
pub struct IssuedChunk {
    pub file: File,
    pub tag_hash: String,
    pub challenge: Challenge,
    pub due_at: i64,
}

enum IssueStep {
    Issued(IssuedChunk),
    /// The chunk could not produce a challenge and was dropped
    Discarded,
    Empty,
}

/// Current challenge of a contract
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeInfo {
    pub challenge: Challenge,
    /// Seconds until the proof is due
    pub due: i64,
    pub due_at: i64,
    pub answered: bool,
    pub interval: i64,
}

/// Per-contract entry of a batch challenge response
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeReport {
    pub file_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(flatten)]
    pub info: Option<ChallengeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-proof entry of an answer report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProofReport {
    pub file_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProofReport {
    fn ok(file_hash: String) -> Self {
        Self {
            file_hash,
            status: Some("ok"),
            error: None,
        }
    }

    fn error(file_hash: String, error: String) -> Self {
        Self {
            file_hash,
            status: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProofSubmission {
    pub file_hash: String,
    pub proof: String,
}

enum ParsedProof {
    Valid { file_hash: String, proof: Proof },
    Invalid { file_hash: String, error: String },
}

pub struct ContractService {
    db: Arc<NodeDb>,
    verifier: Arc<dyn Verifier>,
    admission: Arc<AdmissionController>,
    tags: Arc<TagStore>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl ContractService {
    pub fn new(
        db: Arc<NodeDb>,
        verifier: Arc<dyn Verifier>,
        admission: Arc<AdmissionController>,
        tags: Arc<TagStore>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            verifier,
            admission,
            tags,
            clock,
            config,
        }
    }

    // ========================================================================
    // Issuance
    // ========================================================================

    /// Assign chunks to `token` until `size` bytes, the per-request chunk
    /// limit, the owner's byte quota or the inventory runs out.
    pub fn issue_chunks(
        &self,
        token: &str,
        ip: &str,
        size: Option<u64>,
    ) -> Result<Vec<IssuedChunk>, NodeError> {
        let now = self.clock.now_ms();
        let budget = size.unwrap_or(self.config.default_chunk_size);

        self.db.with_conn(|conn| {
            let token = lookup_token(conn, token)?;
            self.admission.reconcile_ip(conn, &token, ip, true)?;

            let mut remaining = budget;
            let mut issued = Vec::new();
            while issued.len() < self.config.max_chunks_per_request && remaining > 0 {
                let step = conn.immediate_transaction(|conn| {
                    self.issue_one(conn, &token.address, token.id, remaining, now)
                })?;
                match step {
                    IssueStep::Issued(chunk) => {
                        remaining = remaining.saturating_sub(chunk.file.size as u64);
                        issued.push(chunk);
                    }
                    IssueStep::Discarded => continue,
                    IssueStep::Empty => break,
                }
            }

            if issued.is_empty() {
                debug!(farmer_id = %token.farmer_id, budget, "No chunk fits request");
            } else {
                info!(
                    farmer_id = %token.farmer_id,
                    count = issued.len(),
                    bytes = issued.iter().map(|c| c.file.size).sum::<i64>(),
                    "Issued chunks"
                );
            }
            Ok(issued)
        })
    }

    /// Pop one chunk and turn it into a contract with its first challenge.
    /// Runs under the writer lock, so the owner's quota is read here.
    fn issue_one(
        &self,
        conn: &mut SqliteConnection,
        address: &str,
        token_id: i64,
        budget: u64,
        now: i64,
    ) -> Result<IssueStep, NodeError> {
        let held = self.live_bytes_for_address(conn, address, now)?;
        let quota_left = self.config.max_size_per_address.saturating_sub(held);
        let max_size = budget.min(quota_left);
        if max_size == 0 {
            return Ok(IssueStep::Empty);
        }
        let max_size = i64::try_from(max_size).unwrap_or(i64::MAX);
        let Some((chunk, file)) = chunks::pop_largest_fitting(conn, token_id, max_size)? else {
            return Ok(IssueStep::Empty);
        };

        let mut contract = Contract {
            id: 0,
            token_id,
            file_hash: file.hash.clone(),
            tag_hash: chunk.tag_hash.clone(),
            state: State(chunk.state),
            challenge: None,
            start: now,
            due: now,
            answered: true,
            cached: false,
            interval_ms: file.interval_ms(),
        };

        match lifecycle::renew(&mut contract, &*self.verifier, now) {
            Ok(Renewal::Advanced) => {}
            Ok(_) => {
                warn!(file_hash = %file.hash, "Chunk has no challenges, discarding");
                return Ok(IssueStep::Discarded);
            }
            Err(e) if !e.is_internal() => {
                warn!(file_hash = %file.hash, error = %e, "Chunk unusable, discarding");
                return Ok(IssueStep::Discarded);
            }
            Err(e) => return Err(e),
        }

        let challenge = contract
            .challenge
            .clone()
            .ok_or_else(|| NodeError::Internal("Renewed contract has no challenge".into()))?;

        contracts::insert_contract(
            conn,
            &NewContract {
                token_id,
                file_hash: &contract.file_hash,
                state: contract.state.as_bytes(),
                challenge: Some(challenge.as_bytes()),
                tag_hash: &contract.tag_hash,
                start: contract.start,
                due: contract.due,
                answered: contract.answered,
                cached: false,
            },
        )?;

        Ok(IssueStep::Issued(IssuedChunk {
            file,
            tag_hash: contract.tag_hash,
            challenge,
            due_at: contract.due,
        }))
    }

    /// Issue chunks and attach their tags
    pub async fn grant_chunks(
        self: &Arc<Self>,
        token: String,
        ip: String,
        size: Option<u64>,
    ) -> Result<Vec<ChunkGrant>, NodeError> {
        let svc = self.clone();
        let issued = tokio::task::spawn_blocking(move || svc.issue_chunks(&token, &ip, size))
            .await
            .map_err(join_error)??;

        let now = self.clock.now_ms();
        let mut grants = Vec::with_capacity(issued.len());
        for chunk in issued {
            let tag = self.tags.get(&chunk.tag_hash).await?;
            grants.push(ChunkGrant {
                file_hash: chunk.file.hash,
                seed: chunk.file.seed,
                size: chunk.file.size,
                challenge: chunk.challenge,
                tag: base64_encode(&tag),
                due: seconds_until(chunk.due_at, now),
                due_at: chunk.due_at,
                interval: chunk.file.interval_secs,
            });
        }
        Ok(grants)
    }

    /// Bytes of files held under live contracts by every token of `address`
    fn live_bytes_for_address(
        &self,
        conn: &mut SqliteConnection,
        address: &str,
        now: i64,
    ) -> Result<u64, NodeError> {
        let live: i64 = contracts::uncached_for_address(conn, address)?
            .into_iter()
            .filter(|(row, file)| Contract::from_row(row.clone(), file).is_live(now))
            .map(|(_, file)| file.size)
            .sum();
        Ok(live.max(0) as u64)
    }

    // ========================================================================
    // Challenges
    // ========================================================================

    /// Renew (or re-read) the challenge of one contract
    pub fn challenge_one(&self, token: &str, ip: &str, file_hash: &str) -> Result<ChallengeInfo, NodeError> {
        let now = self.clock.now_ms();
        self.db.with_conn(|conn| {
            let token = lookup_token(conn, token)?;
            self.admission.reconcile_ip(conn, &token, ip, false)?;
            self.renew_contract(conn, token.id, file_hash, now)
        })
    }

    /// Renew every unsettled contract of a token, reporting per contract
    pub fn challenge_all(&self, token: &str, ip: &str) -> Result<Vec<ChallengeReport>, NodeError> {
        let now = self.clock.now_ms();
        self.db.with_conn(|conn| {
            let token = lookup_token(conn, token)?;
            self.admission.reconcile_ip(conn, &token, ip, false)?;

            let hashes: Vec<String> = contracts::uncached_for_token(conn, token.id)?
                .into_iter()
                .map(|(row, _)| row.file_hash)
                .collect();

            let mut reports = Vec::with_capacity(hashes.len());
            for file_hash in hashes {
                let report = match self.renew_contract(conn, token.id, &file_hash, now) {
                    Ok(info) => ChallengeReport {
                        file_hash,
                        status: Some("ok"),
                        info: Some(info),
                        error: None,
                    },
                    Err(e) if e.is_internal() => return Err(e),
                    Err(e) => ChallengeReport {
                        file_hash,
                        status: None,
                        info: None,
                        error: Some(e.client_message()),
                    },
                };
                reports.push(report);
            }
            Ok(reports)
        })
    }

    fn renew_contract(
        &self,
        conn: &mut SqliteConnection,
        token_id: i64,
        file_hash: &str,
        now: i64,
    ) -> Result<ChallengeInfo, NodeError> {
        let (contract, renewal) = conn.immediate_transaction(|conn| {
            let (row, file) = contracts::get_for_token_file(conn, token_id, file_hash)?
                .ok_or_else(contract_not_found)?;
            let mut contract = Contract::from_row(row, &file);

            let renewal = lifecycle::renew(&mut contract, &*self.verifier, now)?;
            if renewal.changed_state() {
                contracts::save_progress(conn, contract.id, &contract.progress())?;
            }
            Ok::<_, NodeError>((contract, renewal))
        })?;

        if renewal == Renewal::Exhausted {
            warn!(
                contract = contract.id,
                file_hash = %file_hash,
                expires_at = contract.expiration(),
                "Verifier exhausted, contract retired"
            );
            return Err(NodeError::VerifierExhausted);
        }

        let challenge = contract.challenge.clone().ok_or(NodeError::VerifierExhausted)?;
        Ok(ChallengeInfo {
            challenge,
            due: seconds_until(contract.due, now),
            due_at: contract.due,
            answered: contract.answered,
            interval: contract.interval_ms / 1000,
        })
    }

    // ========================================================================
    // Proofs
    // ========================================================================

    fn answer_contract(
        &self,
        conn: &mut SqliteConnection,
        token_id: i64,
        file_hash: &str,
        proof: &Proof,
        now: i64,
    ) -> Result<bool, NodeError> {
        conn.immediate_transaction(|conn| {
            let (row, file) = contracts::get_for_token_file(conn, token_id, file_hash)?
                .ok_or_else(contract_not_found)?;
            let mut contract = Contract::from_row(row, &file);

            let valid = lifecycle::answer(&mut contract, proof, &*self.verifier, now)?;
            if valid {
                contracts::save_progress(conn, contract.id, &contract.progress())?;
                tokens::increment_heartbeat(conn, token_id)?;
            }
            Ok(valid)
        })
    }

    /// Submit one proof. A proof that does not verify is `InvalidProof`.
    pub fn answer_one(&self, token: &str, ip: &str, file_hash: &str, proof: &Proof) -> Result<(), NodeError> {
        let now = self.clock.now_ms();
        let valid = self.db.with_conn(|conn| {
            let token = lookup_token(conn, token)?;
            self.admission.reconcile_ip(conn, &token, ip, false)?;
            self.answer_contract(conn, token.id, file_hash, proof, now)
        })?;

        if valid {
            debug!(file_hash = %file_hash, "Proof accepted");
            Ok(())
        } else {
            Err(NodeError::InvalidProof)
        }
    }

    /// Verify a batch of proof items.
    ///
    /// A producer task parses items into a bounded channel; this task drains
    /// it and verifies each on the blocking pool. Each item gets its own
    /// report and one bad item never aborts the rest.
    pub async fn answer_batch(
        self: &Arc<Self>,
        token: String,
        ip: String,
        items: Vec<serde_json::Value>,
    ) -> Result<Vec<ProofReport>, NodeError> {
        let svc = self.clone();
        let token_row = tokio::task::spawn_blocking(move || {
            svc.db.with_conn(|conn| {
                let token = lookup_token(conn, &token)?;
                svc.admission.reconcile_ip(conn, &token, &ip, false)?;
                Ok(token)
            })
        })
        .await
        .map_err(join_error)??;

        let (tx, mut rx) = mpsc::channel::<ParsedProof>(PIPELINE_DEPTH);
        let producer = tokio::spawn(async move {
            for item in items {
                if tx.send(parse_proof(item)).await.is_err() {
                    break;
                }
            }
        });

        let mut reports = Vec::new();
        while let Some(parsed) = rx.recv().await {
            let (file_hash, proof) = match parsed {
                ParsedProof::Invalid { file_hash, error } => {
                    reports.push(ProofReport::error(file_hash, error));
                    continue;
                }
                ParsedProof::Valid { file_hash, proof } => (file_hash, proof),
            };

            let svc = self.clone();
            let token_id = token_row.id;
            let hash = file_hash.clone();
            let now = self.clock.now_ms();
            let outcome = tokio::task::spawn_blocking(move || {
                svc.db
                    .with_conn(|conn| svc.answer_contract(conn, token_id, &hash, &proof, now))
            })
            .await
            .map_err(join_error)
            .and_then(|r| r);

            reports.push(match outcome {
                Ok(true) => ProofReport::ok(file_hash),
                Ok(false) => ProofReport::error(file_hash, NodeError::InvalidProof.client_message()),
                Err(e) => {
                    if e.is_internal() {
                        error!(file_hash = %file_hash, error = %e, "Proof verification failed");
                    }
                    ProofReport::error(file_hash, e.client_message())
                }
            });
        }

        producer.await.map_err(join_error)?;

        let accepted = reports.iter().filter(|r| r.status.is_some()).count();
        info!(farmer_id = %token_row.farmer_id, accepted, total = reports.len(), "Processed proofs");
        Ok(reports)
    }
}

fn parse_proof(item: serde_json::Value) -> ParsedProof {
    let file_hash = item
        .get("file_hash")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let submission: ProofSubmission = match serde_json::from_value(item) {
        Ok(s) => s,
        Err(_) => {
            return ParsedProof::Invalid {
                file_hash,
                error: "Malformed proof entry".to_string(),
            }
        }
    };

    match Proof::from_base64(&submission.proof) {
        Ok(proof) => ParsedProof::Valid {
            file_hash: submission.file_hash,
            proof,
        },
        Err(_) => ParsedProof::Invalid {
            file_hash: submission.file_hash,
            error: NodeError::VerifierCorrupted.client_message(),
        },
    }
}

fn contract_not_found() -> NodeError {
    NodeError::NotFound("Contract not found.".to_string())
}

fn join_error(e: tokio::task::JoinError) -> NodeError {
    NodeError::Internal(format!("Blocking task failed: {}", e))
}

fn seconds_until(at_ms: i64, now_ms: i64) -> i64 {
    (at_ms - now_ms).max(0) / 1000
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}
