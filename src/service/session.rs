use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::model::auth::SessionClaims;

/// Decode and verify a session token. Expiry is enforced by the default
/// validation.
pub fn decode_session_token(
    token: &str,
    secret_key: &str,
) -> jsonwebtoken::errors::Result<jsonwebtoken::TokenData<SessionClaims>> {
    decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret_key.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
}

/// Issue a session token for an authenticated principal bound to its active
/// tenant. The credential ceremony itself lives outside this server; this is
/// the shape it must produce.
pub fn encode_session_token(
    claims: &SessionClaims,
    secret_key: &str,
) -> jsonwebtoken::errors::Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret_key.as_bytes()),
    )
}

pub fn session_claims(
    user_id: &str,
    email: &str,
    name: &str,
    tenant_id: &str,
    tenant_slug: &str,
    expire_seconds: i64,
) -> SessionClaims {
    let exp = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::seconds(expire_seconds))
        .map(|t| t.timestamp())
        .unwrap_or_default();

    SessionClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        tenant_id: tenant_id.to_string(),
        tenant_slug: tenant_slug.to_string(),
        exp,
    }
}

/// Password hashing for out-of-band user provisioning.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    bcrypt::verify(password, password_hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-that-is-long-enough-for-hs256";

    #[test]
    fn test_session_token_round_trip() {
        let claims = session_claims("u1", "op@acme.test", "Op", "t1", "acme", 3600);
        let token = encode_session_token(&claims, SECRET).unwrap();
        let decoded = decode_session_token(&token, SECRET).unwrap();
        assert_eq!(decoded.claims.sub, "u1");
        assert_eq!(decoded.claims.tenant_id, "t1");
        assert_eq!(decoded.claims.tenant_slug, "acme");
    }

    #[test]
    fn test_expired_token_rejected() {
        // Expired well past the default validation leeway.
        let claims = session_claims("u1", "op@acme.test", "Op", "t1", "acme", -600);
        let token = encode_session_token(&claims, SECRET).unwrap();
        assert!(decode_session_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let claims = session_claims("u1", "op@acme.test", "Op", "t1", "acme", 3600);
        let token = encode_session_token(&claims, SECRET).unwrap();
        assert!(decode_session_token(&token, "another-secret-also-long-enough!").is_err());
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert!(verify_password("hunter2hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
    }
}
