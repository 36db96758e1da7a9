use rand::RngCore;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Verification and reset tokens expire 10 minutes after issuance.
pub const ACTION_TOKEN_TTL_MINUTES: i64 = 10;

/// Random raw token handed to the user; only its digest is ever stored.
pub fn new_action_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// One-way digest matched against the stored column on consumption.
pub fn hash_action_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

pub fn action_token_expiry() -> OffsetDateTime {
    OffsetDateTime::now_utc() + Duration::minutes(ACTION_TOKEN_TTL_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tokens_are_unique_hex() {
        let a = new_action_token();
        let b = new_action_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_is_deterministic_and_differs_from_raw() {
        let raw = new_action_token();
        let h1 = hash_action_token(&raw);
        let h2 = hash_action_token(&raw);
        assert_eq!(h1, h2);
        assert_ne!(h1, raw);
        assert_eq!(h1.len(), 64); // sha-256 hex
    }

    #[test]
    fn expiry_is_ten_minutes_out() {
        let exp = action_token_expiry();
        let delta = exp - OffsetDateTime::now_utc();
        assert!(delta > Duration::minutes(9));
        assert!(delta <= Duration::minutes(10));
    }
}
