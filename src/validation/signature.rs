//! HMAC-SHA256 signatures over the money-relevant fields of a payment request.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::ValidationError;

type HmacSha256 = Hmac<Sha256>;

/// `transaction_id|payer_vpa|payee_vpa|amount|currency`
pub fn canonical_payload(
    transaction_id: &str,
    payer_vpa: &str,
    payee_vpa: &str,
    amount: i64,
    currency: &str,
) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        transaction_id, payer_vpa, payee_vpa, amount, currency
    )
}

pub fn sign(secret: &str, payload: &str) -> Result<String, ValidationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ValidationError::new("signature", "signing secret is unusable"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify_signature(secret: &str, payload: &str, signature: &str) -> Result<(), ValidationError> {
    let provided = hex::decode(signature.trim())
        .map_err(|_| ValidationError::new("signature", "must be hex encoded"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ValidationError::new("signature", "signing secret is unusable"))?;
    mac.update(payload.as_bytes());

    mac.verify_slice(&provided)
        .map_err(|_| ValidationError::new("signature", "verification failed"))
}
