//! HMAC-SHA256 webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex digest>`; the digest covers
//! `"<t>.<raw body>"`. Several `v1` entries may be present during secret
//! rotation, any one matching is enough.

use {
    crate::domain::error::PipelineError,
    chrono::{DateTime, Utc},
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Webhook-Signature";

/// Allowed clock skew for timestamps from the future.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    fn parse(header: &str) -> Result<Self, PipelineError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| sig_error("malformed signature header"))?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| sig_error("invalid signature timestamp"))?,
                    )
                }
                "v1" => signatures
                    .push(hex::decode(value).map_err(|_| sig_error("invalid signature hex"))?),
                // Unknown schemes are ignored.
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| sig_error("missing signature timestamp"))?;
        if signatures.is_empty() {
            return Err(sig_error("missing v1 signature"));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn sig_error(msg: &str) -> PipelineError {
    PipelineError::WebhookSignature(msg.to_string())
}

pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance_secs,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, PipelineError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| PipelineError::WebhookSignature(format!("bad secret: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Build a header value for `payload`; used by senders and tests.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, PipelineError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let header = SignatureHeader::parse(header)?;

        let age = now
            .timestamp()
            .checked_sub(header.timestamp)
            .ok_or_else(|| sig_error("invalid signature timestamp"))?;
        if age > self.tolerance_secs {
            return Err(sig_error("signature timestamp too old"));
        }
        if age < -MAX_FUTURE_SKEW_SECS {
            return Err(sig_error("signature timestamp in the future"));
        }

        // verify_slice compares in constant time.
        for candidate in &header.signatures {
            if self
                .mac(header.timestamp, payload)?
                .verify_slice(candidate)
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(sig_error("signature mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1"}"#;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET, 300)
    }

    #[test]
    fn signed_payload_verifies() {
        let now = Utc::now();
        let header = verifier().sign(BODY, now.timestamp()).unwrap();
        verifier().verify(BODY, &header, now).unwrap();
    }

    #[test]
    fn tampered_body_rejected() {
        let now = Utc::now();
        let header = verifier().sign(BODY, now.timestamp()).unwrap();
        let err = verifier()
            .verify(br#"{"id":"evt_2"}"#, &header, now)
            .unwrap_err();
        assert!(matches!(err, PipelineError::WebhookSignature(_)));
    }

    #[test]
    fn wrong_secret_rejected() {
        let now = Utc::now();
        let header = SignatureVerifier::new("other", 300)
            .sign(BODY, now.timestamp())
            .unwrap();
        assert!(verifier().verify(BODY, &header, now).is_err());
    }

    #[test]
    fn stale_and_future_timestamps_rejected() {
        let now = Utc::now();
        let old = verifier().sign(BODY, now.timestamp() - 301).unwrap();
        assert!(verifier().verify(BODY, &old, now).is_err());

        let future = verifier().sign(BODY, now.timestamp() + 120).unwrap();
        assert!(verifier().verify(BODY, &future, now).is_err());
    }

    #[test]
    fn any_matching_v1_accepted() {
        let now = Utc::now();
        let good = verifier().sign(BODY, now.timestamp()).unwrap();
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t={},v1={},v1={good_sig}", now.timestamp(), "00".repeat(32));
        verifier().verify(BODY, &header, now).unwrap();
    }

    #[test]
    fn extreme_timestamps_rejected_without_overflow() {
        let now = Utc::now();
        let sig = "00".repeat(32);
        for t in [i64::MIN, i64::MIN + 1, i64::MAX, -1] {
            let header = format!("t={t},v1={sig}");
            let err = verifier().verify(BODY, &header, now).unwrap_err();
            assert!(matches!(err, PipelineError::WebhookSignature(_)), "t={t}");
        }
    }

    #[test]
    fn malformed_headers_rejected() {
        let now = Utc::now();
        for header in ["", "t=abc,v1=00", "v1=00", "t=1", "t=1,v1=zz", "garbage"] {
            assert!(verifier().verify(BODY, header, now).is_err(), "accepted {header:?}");
        }
    }
}
