// Authorization token module
// Mints and verifies the opaque header.payload.signature tokens handed to
// callers on successful authorization. The signing input is hashed with
// Blake2b-256 and signed with the chain's active Ed25519 key; verification
// is mandatory, the token is not a bare hash.

use crate::adapters::epoch_ms;
use crate::errors::RouterError;
use base64::{engine::general_purpose::STANDARD_NO_PAD as B64, Engine as _};
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Token lifetime: five minutes.
pub const TOKEN_TTL_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub strategy_id: String,
    pub chain_id: String,
    pub market: String,
    pub amount: f64,
    pub issued_at: u64,
    pub expires_at: u64,
}

fn signing_digest(header_b64: &str, payload_b64: &str) -> [u8; 32] {
    let mut hasher = Blake2b512::new();
    hasher.update(header_b64.as_bytes());
    hasher.update(b".");
    hasher.update(payload_b64.as_bytes());
    let hash = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hash[..32]);
    digest
}

/// Mint a signed token for an authorized execution.
pub fn mint_token(
    key: &SigningKey,
    strategy_id: &str,
    chain_id: &str,
    market: &str,
    amount: f64,
) -> Result<(String, u64), RouterError> {
    let issued_at = epoch_ms();
    let expires_at = issued_at + TOKEN_TTL_MS;
    let header = TokenHeader {
        alg: "ed25519".to_string(),
        typ: "XAT".to_string(),
    };
    let claims = TokenClaims {
        strategy_id: strategy_id.to_string(),
        chain_id: chain_id.to_string(),
        market: market.to_string(),
        amount,
        issued_at,
        expires_at,
    };

    let header_b64 = B64.encode(
        serde_json::to_vec(&header)
            .map_err(|e| RouterError::Configuration(format!("encode token header: {e}")))?,
    );
    let payload_b64 = B64.encode(
        serde_json::to_vec(&claims)
            .map_err(|e| RouterError::Configuration(format!("encode token payload: {e}")))?,
    );

    let signature = key.sign(&signing_digest(&header_b64, &payload_b64));
    let sig_b64 = B64.encode(signature.to_bytes());

    Ok((format!("{header_b64}.{payload_b64}.{sig_b64}"), expires_at))
}

/// Verify a token's signature and expiry against the chain's public key.
pub fn verify_token(key: &VerifyingKey, token: &str) -> Result<TokenClaims, RouterError> {
    let mut parts = token.split('.');
    let (header_b64, payload_b64, sig_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
        _ => return Err(RouterError::Validation("malformed token".to_string())),
    };

    let sig_bytes = B64
        .decode(sig_b64)
        .map_err(|_| RouterError::Validation("malformed token signature".to_string()))?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| RouterError::Validation("bad token signature length".to_string()))?;
    let signature = Signature::from_bytes(&sig_array);

    key.verify(&signing_digest(header_b64, payload_b64), &signature)
        .map_err(|_| RouterError::Validation("token signature verification failed".to_string()))?;

    let payload = B64
        .decode(payload_b64)
        .map_err(|_| RouterError::Validation("malformed token payload".to_string()))?;
    let claims: TokenClaims = serde_json::from_slice(&payload)
        .map_err(|_| RouterError::Validation("malformed token claims".to_string()))?;

    if epoch_ms() >= claims.expires_at {
        return Err(RouterError::Validation("token expired".to_string()));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn minted_token_round_trips_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let (token, expires_at) = mint_token(&key, "s1", "ethereum", "ETH-USD", 42.0).unwrap();
        let claims = verify_token(&key.verifying_key(), &token).unwrap();
        assert_eq!(claims.strategy_id, "s1");
        assert_eq!(claims.chain_id, "ethereum");
        assert_eq!(claims.expires_at, expires_at);
        assert!((claims.amount - 42.0).abs() < 1e-9);
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let (token, _) = mint_token(&key, "s1", "ethereum", "ETH-USD", 42.0).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = B64.encode(
            serde_json::to_vec(&TokenClaims {
                strategy_id: "s1".to_string(),
                chain_id: "ethereum".to_string(),
                market: "ETH-USD".to_string(),
                amount: 1_000_000.0,
                issued_at: epoch_ms(),
                expires_at: epoch_ms() + TOKEN_TTL_MS,
            })
            .unwrap(),
        );
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(verify_token(&key.verifying_key(), &tampered).is_err());
    }

    #[test]
    fn foreign_key_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let (token, _) = mint_token(&key, "s1", "ethereum", "ETH-USD", 42.0).unwrap();
        assert!(verify_token(&other.verifying_key(), &token).is_err());
    }
}
