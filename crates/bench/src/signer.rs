//! Transaction signing seam.
//!
//! Real signature schemes are node-specific and live outside this crate.
//! [`DigestSigner`] produces deterministic keyed digests so that the harness
//! can run end to end against nodes that do not verify signatures (the
//! in-memory node, devnets with verification disabled).

use txbench_types::{payment_message, PrivateKey, PublicKey, SignedTransaction, TransactionIntent, TxHash};

/// Context string for deriving the digest key from a private key.
const DIGEST_KEY_CONTEXT: &str = "txbench 2024 digest signer payment key";

/// Errors that can occur while signing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("Missing private key for {0}")]
    MissingKey(PublicKey),

    #[error("Cannot sign intent: {0}")]
    InvalidIntent(String),
}

/// Signs transaction intents.
pub trait Signer: Send + Sync {
    fn sign(
        &self,
        intent: &TransactionIntent,
        private_key: &PrivateKey,
    ) -> Result<SignedTransaction, SigningError>;
}

/// Keyed Blake3 digest over the payment signing message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSigner;

impl Signer for DigestSigner {
    fn sign(
        &self,
        intent: &TransactionIntent,
        private_key: &PrivateKey,
    ) -> Result<SignedTransaction, SigningError> {
        if private_key.expose().is_empty() {
            return Err(SigningError::MissingKey(intent.sender.clone()));
        }
        if intent.amount.checked_add(intent.fee).is_none() {
            return Err(SigningError::InvalidIntent(
                "amount plus fee overflows".to_string(),
            ));
        }

        let message = payment_message(intent);
        let key = blake3::derive_key(DIGEST_KEY_CONTEXT, private_key.expose().as_bytes());
        let signature = blake3::keyed_hash(&key, &message);
        let hash = TxHash::from_parts(&[&message, signature.as_bytes()]);

        Ok(SignedTransaction {
            intent: intent.clone(),
            signature: hex::encode(signature.as_bytes()),
            hash,
        })
    }
}
