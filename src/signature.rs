//! Verification of the processor's `Stripe-Signature` header.
//!
//! The header carries a unix timestamp and one or more HMAC-SHA256 digests of
//! `"{timestamp}.{body}"` keyed by the endpoint's webhook secret:
//! `t=1700000000,v1=5257a869...,v1=...`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("signature timestamp {0} is outside the tolerance window")]
    Expired(i64),
    #[error("no signature matches the payload")]
    Mismatch,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or(SignatureError::Malformed)?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| SignatureError::Malformed)?,
                    )
                }
                // Unknown schemes (v0 test signatures among them) are ignored.
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }

        if now.abs_diff(timestamp) > self.tolerance.as_secs() {
            return Err(SignatureError::Expired(timestamp));
        }

        let matched = signatures.into_iter().any(|signature| {
            let Ok(expected) = hex::decode(signature) else {
                return false;
            };

            let mut mac = self.mac();
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.verify_slice(&expected).is_ok()
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(self.secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC key of any size is valid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_700_000_000;
    const PAYLOAD: &[u8] = b"{\"type\":\"payment_intent.succeeded\"}";

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET, Duration::from_secs(300))
    }

    #[test]
    fn accepts_valid_signature() {
        let header = format!("t={},v1={}", NOW, sign(PAYLOAD, SECRET, NOW));

        assert_eq!(verifier().verify_at(PAYLOAD, &header, NOW + 10), Ok(()));
    }

    #[test]
    fn accepts_when_any_signature_matches() {
        let header = format!(
            "t={},v1={},v1={},v0=deadbeef",
            NOW,
            sign(PAYLOAD, "whsec_rotated_out", NOW),
            sign(PAYLOAD, SECRET, NOW)
        );

        assert_eq!(verifier().verify_at(PAYLOAD, &header, NOW), Ok(()));
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = format!("t={},v1={}", NOW, sign(PAYLOAD, "wrong_secret", NOW));

        assert_eq!(
            verifier().verify_at(PAYLOAD, &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_modified_payload() {
        let header = format!("t={},v1={}", NOW, sign(PAYLOAD, SECRET, NOW));
        let tampered = b"{\"type\":\"payment_intent.succeeded\",\"amount\":1}";

        assert_eq!(
            verifier().verify_at(tampered, &header, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_replayed_timestamp() {
        let header = format!("t={},v1={}", NOW, sign(PAYLOAD, SECRET, NOW));

        assert_eq!(
            verifier().verify_at(PAYLOAD, &header, NOW + 600),
            Err(SignatureError::Expired(NOW))
        );
    }

    #[rstest]
    #[case::empty("", SignatureError::Malformed)]
    #[case::garbage("garbage", SignatureError::Malformed)]
    #[case::bad_timestamp("t=abc,v1=00", SignatureError::Malformed)]
    #[case::no_timestamp("v1=00", SignatureError::MissingTimestamp)]
    #[case::no_signature("t=1700000000", SignatureError::MissingSignature)]
    #[case::non_hex("t=1700000000,v1=zz", SignatureError::Mismatch)]
    fn rejects_bad_headers(#[case] header: &str, #[case] expected: SignatureError) {
        assert_eq!(verifier().verify_at(PAYLOAD, header, NOW), Err(expected));
    }
}
