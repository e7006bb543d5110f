//! Webhook signature scheme.
//!
//! Every delivery carries an `Escrow-Signature` header of the form `t=<unix seconds>,v1=<signature>[,v1=<signature>]`.
//! The signature is the base64-encoded HMAC-SHA256 of `"{t}.{raw body}"` keyed with the shared webhook secret.
//! Several `v1` entries may be present while a secret is being rotated; any one of them matching is sufficient.
//!
//! The timestamp is part of the signed material, so a captured delivery cannot be replayed outside the tolerance
//! window with a fresh timestamp.
use hmac::{Hmac, Mac};
use log::*;
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "Escrow-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("The signature header is missing")]
    MissingHeader,
    #[error("The signature header is malformed: {0}")]
    MalformedHeader(String),
    #[error("The signature timestamp is outside the allowed tolerance")]
    TimestampOutOfTolerance,
    #[error("No signature in the header matches the payload")]
    NoMatchingSignature,
    #[error("The webhook secret is not configured")]
    NoSecret,
}

/// Computes the raw base64 signature for a payload signed at `timestamp`.
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::NoSecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::MalformedHeader(format!("invalid key: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(base64::encode(mac.finalize().into_bytes()))
}

/// Produces a complete header value for `body`. Used by the tooling and tests to simulate provider deliveries.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
    let sig = compute_signature(secret, timestamp, body)?;
    Ok(format!("t={timestamp},v1={sig}"))
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or_else(|| SignatureError::MalformedHeader(format!("'{part}' is not a key=value pair")))?;
        match key {
            "t" => {
                let t = value
                    .parse::<i64>()
                    .map_err(|e| SignatureError::MalformedHeader(format!("invalid timestamp: {e}")))?;
                timestamp = Some(t);
            },
            "v1" => signatures.push(value.to_string()),
            _ => trace!("🔐️ Ignoring unknown signature scheme '{key}'"),
        }
    }
    let timestamp = timestamp.ok_or_else(|| SignatureError::MalformedHeader("no timestamp".into()))?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader("no v1 signature".into()));
    }
    Ok(ParsedHeader { timestamp, signatures })
}

/// Verifies a signature header against the raw request body.
///
/// `now` is the receiver's current unix time, and `tolerance_secs` the maximum allowed skew in either direction.
pub fn verify_signature(
    header: Option<&str>,
    body: &[u8],
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;
    let parsed = parse_header(header)?;
    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance);
    }
    let expected = compute_signature(secret, parsed.timestamp, body)?;
    let matched = parsed.signatures.iter().any(|s| constant_time_eq(s.as_bytes(), expected.as_bytes()));
    if matched {
        Ok(())
    } else {
        Err(SignatureError::NoMatchingSignature)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod test {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payout.paid"}"#;

    #[test]
    fn valid_signature_passes() {
        let header = sign_payload(SECRET, 1_700_000_000, BODY).unwrap();
        assert!(verify_signature(Some(&header), BODY, SECRET, 1_700_000_010, 300).is_ok());
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign_payload(SECRET, 1_700_000_000, BODY).unwrap();
        let err = verify_signature(Some(&header), b"{}", SECRET, 1_700_000_000, 300).unwrap_err();
        assert_eq!(err, SignatureError::NoMatchingSignature);
    }

    #[test]
    fn stale_timestamp_fails() {
        let header = sign_payload(SECRET, 1_700_000_000, BODY).unwrap();
        let err = verify_signature(Some(&header), BODY, SECRET, 1_700_001_000, 300).unwrap_err();
        assert_eq!(err, SignatureError::TimestampOutOfTolerance);
    }

    #[test]
    fn rotated_secrets() {
        let old = compute_signature("old_secret", 1_700_000_000, BODY).unwrap();
        let new = compute_signature(SECRET, 1_700_000_000, BODY).unwrap();
        let header = format!("t=1700000000,v1={old},v1={new}");
        assert!(verify_signature(Some(&header), BODY, SECRET, 1_700_000_000, 300).is_ok());
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(verify_signature(None, BODY, SECRET, 0, 300).unwrap_err(), SignatureError::MissingHeader);
        assert!(matches!(
            verify_signature(Some("v1=abc"), BODY, SECRET, 0, 300),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert!(matches!(
            verify_signature(Some("t=12"), BODY, SECRET, 12, 300),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert_eq!(compute_signature("", 1, BODY).unwrap_err(), SignatureError::NoSecret);
    }
}
