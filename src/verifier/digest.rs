//! Precomputed-challenge verifier.
//!
//! At encode time the node samples `challenges` blocks of the content with
//! nonces derived from a secret key and records `sha256(nonce || block)` for
//! each. A challenge hands the farmer one `(nonce, offset, length)` triple;
//! the proof is the digest the farmer computes over its own copy.
//!
//! State layout:
//!
//! ```text
//! [flag: u8]                       0 = no outstanding challenge, 1 = outstanding
//! [challenge sha256 | expected]    64 bytes, present only when flag = 1
//! [entry]*                         remaining unused challenges, ENTRY_LEN each
//! ```
//!
//! entry = nonce (32) | offset (u64 BE) | length (u32 BE) | expected (32)

use std::io::Read;
use std::path::Path;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{Challenge, Proof, State, Tag, Verifier};
use crate::error::VerifierError;

/// Bytes covered by a single challenge
pub const BLOCK_SIZE: usize = 256;

const NONCE_LEN: usize = 32;
const CHALLENGE_LEN: usize = NONCE_LEN + 8 + 4;
const ENTRY_LEN: usize = CHALLENGE_LEN + 32;
const OUTSTANDING_LEN: usize = 64;

pub struct DigestVerifier {
    key: [u8; 32],
    challenges: usize,
}

impl DigestVerifier {
    pub fn new(key: [u8; 32], challenges: usize) -> Self {
        Self { key, challenges }
    }

    /// Fresh random key. Contracts encoded under it cannot be verified after
    /// a restart unless the key is persisted.
    pub fn random(challenges: usize) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key, challenges)
    }

    /// Load the hex key at `path`, creating it on first run.
    pub fn load_or_create(path: &Path, challenges: usize) -> std::io::Result<Self> {
        if path.exists() {
            let encoded = std::fs::read_to_string(path)?;
            let bytes = hex::decode(encoded.trim())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let key: [u8; 32] = bytes.try_into().map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "verifier key must be 32 bytes")
            })?;
            return Ok(Self::new(key, challenges));
        }

        let verifier = Self::random(challenges);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, hex::encode(verifier.key))?;
        info!(path = %path.display(), "Generated new verifier key");
        Ok(verifier)
    }

    /// Compute the proof for `challenge` over `content`.
    ///
    /// This is the farmer side of the scheme.
    pub fn prove(challenge: &Challenge, content: &[u8]) -> Result<Proof, VerifierError> {
        let bytes = challenge.as_bytes();
        if bytes.len() != CHALLENGE_LEN {
            return Err(VerifierError::Corrupted(format!(
                "challenge must be {} bytes, got {}",
                CHALLENGE_LEN,
                bytes.len()
            )));
        }
        let nonce = &bytes[..NONCE_LEN];
        let offset = read_u64(&bytes[NONCE_LEN..NONCE_LEN + 8]) as usize;
        let length = read_u32(&bytes[NONCE_LEN + 8..CHALLENGE_LEN]) as usize;

        let block = offset
            .checked_add(length)
            .and_then(|end| content.get(offset..end))
            .ok_or_else(|| VerifierError::Corrupted("challenge range outside content".into()))?;

        Ok(Proof(block_digest(nonce, block).to_vec()))
    }

    fn nonce(&self, content_digest: &[u8], index: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(content_digest);
        hasher.update(index.to_be_bytes());
        hasher.finalize().into()
    }
}

impl Verifier for DigestVerifier {
    fn kind(&self) -> &'static str {
        "digest-sha256"
    }

    fn public_params(&self) -> serde_json::Value {
        serde_json::json!({
            "block_size": BLOCK_SIZE,
            "challenge": "nonce[32] | offset u64 be | length u32 be",
            "proof": "sha256(nonce || data[offset..offset + length])",
        })
    }

    fn encode(&self, content: &mut dyn Read) -> Result<(Tag, State), VerifierError> {
        let mut data = Vec::new();
        content
            .read_to_end(&mut data)
            .map_err(|e| VerifierError::Corrupted(format!("content read failed: {}", e)))?;
        if data.is_empty() {
            return Err(VerifierError::Corrupted("content is empty".into()));
        }

        let content_digest = Sha256::digest(&data);
        let mut tag = content_digest.to_vec();
        tag.extend_from_slice(&(data.len() as u64).to_be_bytes());

        let block_len = BLOCK_SIZE.min(data.len());
        let span = (data.len() - block_len + 1) as u64;

        let mut state = Vec::with_capacity(1 + self.challenges * ENTRY_LEN);
        state.push(0u8);
        for index in 0..self.challenges as u64 {
            let nonce = self.nonce(&content_digest, index);
            let offset = read_u64(&nonce[..8]) % span;
            let start = offset as usize;
            let expected = block_digest(&nonce, &data[start..start + block_len]);

            state.extend_from_slice(&nonce);
            state.extend_from_slice(&offset.to_be_bytes());
            state.extend_from_slice(&(block_len as u32).to_be_bytes());
            state.extend_from_slice(&expected);
        }

        Ok((Tag(tag), State(state)))
    }

    fn generate_challenge(&self, state: &State) -> Result<(Challenge, State), VerifierError> {
        let entries = pending_entries(state.as_bytes())?;
        if entries.is_empty() {
            return Err(VerifierError::Exhausted);
        }

        let (entry, rest) = entries.split_at(ENTRY_LEN);
        let challenge = &entry[..CHALLENGE_LEN];
        let expected = &entry[CHALLENGE_LEN..];

        let mut next = Vec::with_capacity(1 + OUTSTANDING_LEN + rest.len());
        next.push(1u8);
        next.extend_from_slice(&Sha256::digest(challenge));
        next.extend_from_slice(expected);
        next.extend_from_slice(rest);

        Ok((Challenge(challenge.to_vec()), State(next)))
    }

    fn verify(
        &self,
        proof: &Proof,
        challenge: &Challenge,
        state: &State,
    ) -> Result<bool, VerifierError> {
        let bytes = state.as_bytes();
        if bytes.first() != Some(&1) || bytes.len() < 1 + OUTSTANDING_LEN {
            return Err(VerifierError::Corrupted("no outstanding challenge in state".into()));
        }
        if bytes[1..33] != Sha256::digest(challenge.as_bytes())[..] {
            return Err(VerifierError::Corrupted("challenge does not match state".into()));
        }
        if proof.as_bytes().len() != 32 {
            return Err(VerifierError::Corrupted(format!(
                "proof must be 32 bytes, got {}",
                proof.as_bytes().len()
            )));
        }

        Ok(proof.as_bytes() == &bytes[33..1 + OUTSTANDING_LEN])
    }
}

fn pending_entries(state: &[u8]) -> Result<&[u8], VerifierError> {
    let entries = match state.first() {
        Some(0) => &state[1..],
        Some(1) if state.len() >= 1 + OUTSTANDING_LEN => &state[1 + OUTSTANDING_LEN..],
        _ => return Err(VerifierError::Corrupted("unrecognised state header".into())),
    };
    if entries.len() % ENTRY_LEN != 0 {
        return Err(VerifierError::Corrupted("truncated challenge entry".into()));
    }
    Ok(entries)
}

fn block_digest(nonce: &[u8], block: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(block);
    hasher.finalize().into()
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn content() -> Vec<u8> {
        (0..4096u32).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_honest_farmer_passes_every_challenge() {
        let verifier = DigestVerifier::new([7u8; 32], 3);
        let data = content();
        let (_tag, mut state) = verifier.encode(&mut Cursor::new(&data)).unwrap();

        for _ in 0..3 {
            let (challenge, next) = verifier.generate_challenge(&state).unwrap();
            let proof = DigestVerifier::prove(&challenge, &data).unwrap();
            assert!(verifier.verify(&proof, &challenge, &next).unwrap());
            state = next;
        }

        assert_eq!(
            verifier.generate_challenge(&state).unwrap_err(),
            VerifierError::Exhausted
        );
    }

    #[test]
    fn test_wrong_data_fails_verification() {
        let verifier = DigestVerifier::new([7u8; 32], 1);
        let data = content();
        let (_tag, state) = verifier.encode(&mut Cursor::new(&data)).unwrap();
        let (challenge, state) = verifier.generate_challenge(&state).unwrap();

        let forged = vec![0u8; data.len()];
        let proof = DigestVerifier::prove(&challenge, &forged).unwrap();
        assert!(!verifier.verify(&proof, &challenge, &state).unwrap());
    }

    #[test]
    fn test_malformed_proof_is_corrupted() {
        let verifier = DigestVerifier::new([1u8; 32], 1);
        let (_tag, state) = verifier.encode(&mut Cursor::new(content())).unwrap();
        let (challenge, state) = verifier.generate_challenge(&state).unwrap();

        let err = verifier.verify(&Proof(vec![1, 2, 3]), &challenge, &state).unwrap_err();
        assert!(matches!(err, VerifierError::Corrupted(_)));
    }

    #[test]
    fn test_small_content_uses_whole_block() {
        let verifier = DigestVerifier::new([2u8; 32], 2);
        let data = b"tiny".to_vec();
        let (tag, state) = verifier.encode(&mut Cursor::new(&data)).unwrap();
        assert_eq!(tag.as_bytes().len(), 40);

        let (challenge, state) = verifier.generate_challenge(&state).unwrap();
        let proof = DigestVerifier::prove(&challenge, &data).unwrap();
        assert!(verifier.verify(&proof, &challenge, &state).unwrap());
    }

    #[test]
    fn test_key_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verifier.key");

        let first = DigestVerifier::load_or_create(&path, 1).unwrap();
        let second = DigestVerifier::load_or_create(&path, 1).unwrap();
        assert_eq!(first.key, second.key);
    }
}
