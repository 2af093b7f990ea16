// Request signing and nonce utilities.
//
// Unauthenticated gateway calls are authorized with a base64-encoded
// HMAC-SHA256 of the exact request body; the signature must cover the same
// bytes that go on the wire, so callers serialize once and pass the string
// both here and to the request builder.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::Rng as _;
use sha2::Sha256;

/// Sign `data` with HMAC-SHA256 and return the base64 digest.
pub fn hmac_sign(data: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Generate an 8-character alphanumeric nonce.
pub fn nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| char::from(rng.sample(rand::distributions::Alphanumeric)))
        .collect()
}

/// Current epoch time in milliseconds, as the decimal string the wire
/// protocol uses for `sequence` fields.
pub fn sequence_ms() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_per_secret() {
        let a = hmac_sign("payload", "secret-one");
        let b = hmac_sign("payload", "secret-one");
        let c = hmac_sign("payload", "secret-two");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn signature_is_base64_of_a_sha256_tag() {
        let sig = hmac_sign("{\"grantType\":\"authorization_code\"}", "app-secret");
        let raw = BASE64.decode(&sig).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn nonce_is_eight_alphanumeric_chars() {
        for _ in 0..32 {
            let n = nonce();
            assert_eq!(n.len(), 8);
            assert!(n.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn sequence_is_millisecond_scale() {
        let seq: i64 = sequence_ms().parse().unwrap();
        // Sanity bound: after 2020, before 2100.
        assert!(seq > 1_577_836_800_000);
        assert!(seq < 4_102_444_800_000);
    }
}
