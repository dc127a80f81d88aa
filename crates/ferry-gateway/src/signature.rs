// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook signature verification.
//!
//! Meta signs every webhook POST with an HMAC-SHA256 over the exact raw
//! request body, delivered as `X-Hub-Signature-256: sha256=<hex>`. Both
//! comparisons in this module are constant-time: signature verification
//! goes through `Mac::verify_slice`, and shared-secret checks use an
//! xor-fold so execution time is independent of where the inputs differ.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify an `X-Hub-Signature-256` header against the raw request body.
///
/// Fails closed: a header that is not exactly `sha256=<64 hex chars>` is
/// rejected before any crypto runs. Verification failure is permanent --
/// callers respond 401 and never retry.
pub fn verify_signature(raw_body: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_signature) else {
        return false;
    };
    if signature.len() != 32 {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&signature).is_ok()
}

/// Compute the signature header value for a body. Test and tooling helper.
pub fn sign(raw_body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(raw_body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time equality for shared secrets.
///
/// Length mismatch returns early; that leaks only the length, which the
/// header already reveals.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"app-secret";

    #[test]
    fn signed_body_verifies() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        let header = sign(body, SECRET);
        assert!(verify_signature(body, &header, SECRET));
    }

    #[test]
    fn any_single_byte_mutation_fails() {
        let body = br#"{"object":"instagram","entry":[{"id":"1"}]}"#.to_vec();
        let header = sign(&body, SECRET);

        for i in 0..body.len() {
            let mut mutated = body.clone();
            mutated[i] ^= 0x01;
            assert!(
                !verify_signature(&mutated, &header, SECRET),
                "mutation at byte {i} must invalidate the signature"
            );
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = sign(body, SECRET);
        assert!(!verify_signature(body, &header, b"other-secret"));
    }

    #[test]
    fn malformed_headers_fail_closed() {
        let body = b"payload";
        let valid_hex = &sign(body, SECRET)["sha256=".len()..];

        assert!(!verify_signature(body, "", SECRET));
        assert!(!verify_signature(body, valid_hex, SECRET)); // missing prefix
        assert!(!verify_signature(body, &format!("sha1={valid_hex}"), SECRET));
        assert!(!verify_signature(body, "sha256=nothex", SECRET));
        assert!(!verify_signature(body, "sha256=abcd", SECRET)); // wrong length
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(constant_time_eq(b"", b""));
    }
}
