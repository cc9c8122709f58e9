//! Pluggable proof-of-storage verifier.
//!
//! The node never looks inside a [`Challenge`], [`Tag`], [`Proof`] or
//! [`State`]. It stores them, hands them to farmers and passes them back to
//! the [`Verifier`] it was constructed with. One verifier instance is built at
//! startup and shared by reference with every component that needs it.
//!
//! All verifier calls are CPU-bound and synchronous; async callers run them
//! on the blocking pool.

mod digest;

pub use digest::DigestVerifier;

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VerifierError;

macro_rules! opaque_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub Vec<u8>);

        impl $name {
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn to_base64(&self) -> String {
                BASE64.encode(&self.0)
            }

            pub fn from_base64(encoded: &str) -> Result<Self, VerifierError> {
                BASE64
                    .decode(encoded)
                    .map($name)
                    .map_err(|e| VerifierError::Corrupted(e.to_string()))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = String::deserialize(deserializer)?;
                $name::from_base64(&encoded).map_err(serde::de::Error::custom)
            }
        }
    };
}

opaque_bytes!(
    /// Question put to a farmer for one proof cycle.
    Challenge
);
opaque_bytes!(
    /// Public encoding artifact shipped to the farmer alongside the content.
    Tag
);
opaque_bytes!(
    /// Farmer's answer to a challenge.
    Proof
);
opaque_bytes!(
    /// Node-private per-contract state. Evolves with every challenge.
    State
);

pub trait Verifier: Send + Sync {
    /// Short scheme name reported to farmers in heartbeats.
    fn kind(&self) -> &'static str;

    /// Public parameters a farmer needs to construct proofs.
    fn public_params(&self) -> serde_json::Value;

    /// Read a content stream and produce its tag and initial state.
    fn encode(&self, content: &mut dyn Read) -> Result<(Tag, State), VerifierError>;

    /// Derive the next challenge from `state`, returning the advanced state.
    ///
    /// Returns [`VerifierError::Exhausted`] when no further challenge exists.
    fn generate_challenge(&self, state: &State) -> Result<(Challenge, State), VerifierError>;

    /// Check a proof against the challenge produced for `state`.
    fn verify(&self, proof: &Proof, challenge: &Challenge, state: &State)
        -> Result<bool, VerifierError>;
}
