//! Domain-separated signing messages.
//!
//! The signing message for a payment is the domain tag followed by the
//! intent's fields in a fixed order. Signers hash or sign this message; the
//! harness never depends on the concrete scheme.

use crate::TransactionIntent;

/// Domain tag for payment transactions.
///
/// Format: `PAYMENT` || sender || 0x00 || receiver || 0x00 || amount || fee || nonce || memo
pub const DOMAIN_PAYMENT: &[u8] = b"PAYMENT";

/// Build the signing message for a payment intent.
pub fn payment_message(intent: &TransactionIntent) -> Vec<u8> {
    let memo = intent.memo.as_deref().unwrap_or_default();
    let mut message = Vec::with_capacity(
        DOMAIN_PAYMENT.len()
            + intent.sender.as_bytes().len()
            + intent.receiver.as_bytes().len()
            + memo.len()
            + 26,
    );
    message.extend_from_slice(DOMAIN_PAYMENT);
    message.extend_from_slice(intent.sender.as_bytes());
    message.push(0);
    message.extend_from_slice(intent.receiver.as_bytes());
    message.push(0);
    message.extend_from_slice(&intent.amount.as_nano().to_le_bytes());
    message.extend_from_slice(&intent.fee.as_nano().to_le_bytes());
    message.extend_from_slice(&intent.nonce.to_le_bytes());
    message.extend_from_slice(memo.as_bytes());
    message
}
