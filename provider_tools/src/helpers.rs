use std::collections::HashMap;

use hmac::{Hmac, Mac};
use order_payment_engine::traits::OutcomeHint;
use sha2::{Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Hex-encoded HMAC-SHA256 of `data`.
pub fn hmac_sha256_hex(secret: &str, data: &[u8]) -> String {
    sha256_mac(secret, data).map(|mac| hex::encode(mac.finalize().into_bytes())).unwrap_or_default()
}

/// Hex-encoded HMAC-SHA512 of `data`.
pub fn hmac_sha512_hex(secret: &str, data: &[u8]) -> String {
    sha512_mac(secret, data).map(|mac| hex::encode(mac.finalize().into_bytes())).unwrap_or_default()
}

/// Checks a hex-encoded HMAC-SHA256 signature in constant time.
pub fn verify_sha256_hex(secret: &str, data: &[u8], signature: &str) -> bool {
    match (hex::decode(signature.trim()), sha256_mac(secret, data)) {
        (Ok(expected), Some(mac)) => mac.verify_slice(&expected).is_ok(),
        _ => false,
    }
}

/// Checks a hex-encoded HMAC-SHA512 signature in constant time.
pub fn verify_sha512_hex(secret: &str, data: &[u8], signature: &str) -> bool {
    match (hex::decode(signature.trim()), sha512_mac(secret, data)) {
        (Ok(expected), Some(mac)) => mac.verify_slice(&expected).is_ok(),
        _ => false,
    }
}

fn sha256_mac(secret: &str, data: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(data);
    Some(mac)
}

fn sha512_mac(secret: &str, data: &[u8]) -> Option<HmacSha512> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(data);
    Some(mac)
}

/// Compares two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The first non-empty value among `keys`.
pub fn first_param<'a>(params: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().filter_map(|k| params.get(*k)).map(|v| v.trim()).find(|v| !v.is_empty())
}

/// Reads the advisory outcome from the `status` parameter of a return URL. The orchestrator's own cancel URL sets
/// `status=cancelled`; providers add their own values on top.
pub fn outcome_hint(status: Option<&str>) -> OutcomeHint {
    match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("successful" | "success" | "completed" | "paid") => OutcomeHint::Success,
        Some("cancelled" | "canceled" | "cancel") => OutcomeHint::Cancelled,
        _ => OutcomeHint::Unknown,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hmac_round_trip() {
        let sig = hmac_sha256_hex("whsec_test", b"1700000000.{}");
        assert_eq!(sig.len(), 64);
        assert!(verify_sha256_hex("whsec_test", b"1700000000.{}", &sig));
        assert!(!verify_sha256_hex("whsec_other", b"1700000000.{}", &sig));
        assert!(!verify_sha256_hex("whsec_test", b"1700000000.{}", "not hex"));

        let sig = hmac_sha512_hex("sk_test", br#"{"event":"charge.success"}"#);
        assert_eq!(sig.len(), 128);
        assert!(verify_sha512_hex("sk_test", br#"{"event":"charge.success"}"#, &sig.to_uppercase()));
        assert!(!verify_sha512_hex("sk_test", br#"{"event":"charge.failed"}"#, &sig));
    }

    #[test]
    fn known_sha256_vector() {
        // RFC 4231, test case 2
        assert_eq!(
            hmac_sha256_hex("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn params_and_hints() {
        let params = [("trxref", "T1"), ("reference", " "), ("status", "Cancelled")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<String, String>>();
        assert_eq!(first_param(&params, &["reference", "trxref"]), Some("T1"));
        assert_eq!(first_param(&params, &["session_id"]), None);
        assert_eq!(outcome_hint(params.get("status").map(String::as_str)), OutcomeHint::Cancelled);
        assert_eq!(outcome_hint(Some("successful")), OutcomeHint::Success);
        assert_eq!(outcome_hint(None), OutcomeHint::Unknown);
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
