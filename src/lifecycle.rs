//! Contract state machine
//!
//! ```text
//!   Issued ──renew──▶ AwaitingProof ──answer──▶ Answered
//!                        ▲                        │
//!                        └─────────renew──────────┘
//!   any state with now >= expiration ──▶ Expired (terminal, discovered lazily)
//! ```
//!
//! `expiration` is `due + interval` once the current challenge is answered
//! and `due` otherwise. Issued contracts start answered with `due = issue
//! time`, so the first renew fires straight away.
//!
//! Functions here mutate an in-memory [`Contract`] only. Callers load the row,
//! apply a transition and write [`Contract::progress`] back inside one
//! transaction.

use tracing::debug;

use crate::db::models::{ContractProgress, ContractRow, File};
use crate::error::{NodeError, VerifierError};
use crate::verifier::{Challenge, Proof, State, Verifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub id: i64,
    pub token_id: i64,
    pub file_hash: String,
    pub tag_hash: String,
    pub state: State,
    pub challenge: Option<Challenge>,
    pub start: i64,
    pub due: i64,
    pub answered: bool,
    pub cached: bool,
    pub interval_ms: i64,
}

impl Contract {
    pub fn from_row(row: ContractRow, file: &File) -> Self {
        Self {
            id: row.id,
            token_id: row.token_id,
            file_hash: row.file_hash,
            tag_hash: row.tag_hash,
            state: State(row.state),
            challenge: row.challenge.map(Challenge),
            start: row.start,
            due: row.due,
            answered: row.answered,
            cached: row.cached,
            interval_ms: file.interval_ms(),
        }
    }

    pub fn expiration(&self) -> i64 {
        if self.answered {
            self.due + self.interval_ms
        } else {
            self.due
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expiration()
    }

    /// A contract that still has an obligation running at `now`
    pub fn is_live(&self, now: i64) -> bool {
        !self.is_expired(now)
    }

    pub fn progress(&self) -> ContractProgress {
        ContractProgress {
            state: self.state.0.clone(),
            challenge: self.challenge.as_ref().map(|c| c.0.clone()),
            due: self.due,
            answered: self.answered,
        }
    }
}

/// Result of a renew call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// The outstanding challenge is still current; nothing changed
    Unchanged,
    /// A new challenge was issued and `due` moved forward
    Advanced,
    /// The verifier has no challenges left. The contract was retired and will
    /// expire at its current `due`.
    Exhausted,
}

impl Renewal {
    pub fn changed_state(&self) -> bool {
        !matches!(self, Renewal::Unchanged)
    }
}

/// Move `contract` to its next challenge if the current one is spent.
pub fn renew(contract: &mut Contract, verifier: &dyn Verifier, now: i64) -> Result<Renewal, NodeError> {
    let expiration = contract.expiration();
    if now >= expiration {
        return Err(NodeError::ContractExpired);
    }

    if contract.challenge.is_some() && now < contract.due {
        return Ok(Renewal::Unchanged);
    }

    match verifier.generate_challenge(&contract.state) {
        Ok((challenge, state)) => {
            contract.challenge = Some(challenge);
            contract.state = state;
            contract.due = expiration;
            contract.answered = false;
            debug!(contract = contract.id, due = contract.due, "Issued next challenge");
            Ok(Renewal::Advanced)
        }
        Err(VerifierError::Exhausted) => {
            contract.challenge = None;
            contract.answered = false;
            Ok(Renewal::Exhausted)
        }
        Err(e) => Err(e.into()),
    }
}

/// Check `proof` against the outstanding challenge.
///
/// Returns `Ok(false)` for a well-formed proof that does not verify. On
/// success the contract is marked answered; `state` and `due` are left for
/// the next renew.
pub fn answer(
    contract: &mut Contract,
    proof: &Proof,
    verifier: &dyn Verifier,
    now: i64,
) -> Result<bool, NodeError> {
    if contract.is_expired(now) {
        return Err(NodeError::ContractExpired);
    }
    if contract.answered {
        return Err(NodeError::ChallengeAlreadyAnswered);
    }

    let challenge = contract.challenge.as_ref().ok_or(NodeError::VerifierExhausted)?;
    let valid = verifier.verify(proof, challenge, &contract.state)?;
    if valid {
        contract.answered = true;
    }
    Ok(valid)
}
