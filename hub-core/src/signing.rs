//! HMAC-SHA256 signing for file download URLs and viewport stream tokens.
//! `hmac`+`sha2` are the narrowest crates that express this; see DESIGN.md,
//! since the base dependency stack doesn't otherwise need HMAC.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signing key")]
    InvalidKey,
}

/// Signs `"{agentId}|{path}|{exp}"` with the hub's signing secret.
pub fn sign_file_url(
    secret: &[u8],
    agent_id: &str,
    path: &str,
    exp_unix_secs: i64,
) -> Result<String, SigningError> {
    sign_message(secret, &format!("{agent_id}|{path}|{exp_unix_secs}"))
}

/// Verifies a file-URL signature. Rejects missing, malformed, expired, or
/// invalid signatures.
pub fn verify_file_url(
    secret: &[u8],
    agent_id: &str,
    path: &str,
    exp_unix_secs: i64,
    sig_hex: &str,
    now_unix_secs: i64,
) -> bool {
    if exp_unix_secs <= now_unix_secs {
        return false;
    }
    let Ok(expected) = sign_file_url(secret, agent_id, path, exp_unix_secs) else {
        return false;
    };
    crate::auth::constant_time_eq(&expected, sig_hex)
}

/// Signs a viewport stream token: HMAC over `{agentId, clientId, issuedAt, expiry}`.
pub fn sign_stream_token(
    secret: &[u8],
    agent_id: &str,
    client_id: &str,
    issued_at: i64,
    expiry: i64,
) -> Result<String, SigningError> {
    sign_message(
        secret,
        &format!("{agent_id}|{client_id}|{issued_at}|{expiry}"),
    )
}

pub fn verify_stream_token(
    secret: &[u8],
    agent_id: &str,
    client_id: &str,
    issued_at: i64,
    expiry: i64,
    token: &str,
    now_unix_secs: i64,
) -> bool {
    if expiry <= now_unix_secs {
        return false;
    }
    let Ok(expected) = sign_stream_token(secret, agent_id, client_id, issued_at, expiry) else {
        return false;
    };
    crate::auth::constant_time_eq(&expected, token)
}

fn sign_message(secret: &[u8], message: &str) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SigningError::InvalidKey)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_url_roundtrip() {
        let secret = b"hub-secret";
        let exp = 4_000_000_000;
        let sig = sign_file_url(secret, "agent-1", "report.pdf", exp).unwrap();
        assert!(verify_file_url(secret, "agent-1", "report.pdf", exp, &sig, 1));
    }

    #[test]
    fn file_url_rejects_wrong_inputs() {
        let secret = b"hub-secret";
        let exp = 4_000_000_000;
        let sig = sign_file_url(secret, "agent-1", "report.pdf", exp).unwrap();
        assert!(!verify_file_url(secret, "agent-2", "report.pdf", exp, &sig, 1));
        assert!(!verify_file_url(secret, "agent-1", "other.pdf", exp, &sig, 1));
        assert!(!verify_file_url(secret, "agent-1", "report.pdf", exp, "deadbeef", 1));
    }

    #[test]
    fn file_url_rejects_expired() {
        let secret = b"hub-secret";
        let exp = 100;
        let sig = sign_file_url(secret, "agent-1", "report.pdf", exp).unwrap();
        assert!(!verify_file_url(secret, "agent-1", "report.pdf", exp, &sig, 200));
    }

    #[test]
    fn stream_token_roundtrip() {
        let secret = b"stream-secret";
        let tok = sign_stream_token(secret, "a1", "c1", 10, 4_000_000_000).unwrap();
        assert!(verify_stream_token(secret, "a1", "c1", 10, 4_000_000_000, &tok, 20));
        assert!(!verify_stream_token(secret, "a1", "c2", 10, 4_000_000_000, &tok, 20));
    }
}
