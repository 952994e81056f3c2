//! Password-grant token issuance and bearer verification.
//!
//! The credential store carries the single configured demo user keyed by
//! the lowercase-trimmed email. Passwords are compared as SHA-256 hex
//! digests of their UTF-8 bytes; tokens are HS256 JWTs carrying the subject
//! email and an expiry.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("incorrect username or password")]
    BadCredentials,
    #[error("could not validate credentials")]
    InvalidToken,
}

/// Form body of the token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

#[derive(Clone, Debug)]
struct StoredUser {
    email: String,
    hashed_password: String,
}

fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Issues and verifies bearer tokens against the process-level credential
/// store.
pub struct Authenticator {
    users: HashMap<String, StoredUser>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_lifetime: Duration,
}

impl Authenticator {
    pub fn new(secret: &str, expire_minutes: i64, email: &str, password: &str) -> Self {
        let mut users = HashMap::new();
        users.insert(
            normalize_identifier(email),
            StoredUser {
                email: email.to_owned(),
                hashed_password: hash_password(password),
            },
        );
        Self {
            users,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_lifetime: Duration::minutes(expire_minutes),
        }
    }

    fn authenticate(&self, username: &str, password: &str) -> Option<&StoredUser> {
        let user = self.users.get(&normalize_identifier(username))?;
        if user.hashed_password == hash_password(password) {
            Some(user)
        } else {
            None
        }
    }

    /// Validates the form credentials and issues a fresh token.
    pub fn issue(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let email = self
            .authenticate(username, password)
            .ok_or(AuthError::BadCredentials)?
            .email
            .clone();
        Ok(self.issue_token_at(&email, Utc::now()))
    }

    /// Signs a token for the given subject expiring one lifetime after
    /// `now`. Exposed separately so expiry behaviour is testable with a
    /// frozen clock.
    pub fn issue_token_at(&self, email: &str, now: DateTime<Utc>) -> String {
        let claims = Claims {
            sub: email.to_owned(),
            exp: (now + self.token_lifetime).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .expect("HS256 signing cannot fail with in-memory claims")
    }

    /// Verifies an `Authorization` header value and returns the subject's
    /// stored email. Any failure collapses into `InvalidToken`; the HTTP
    /// layer answers 401 with a bearer challenge.
    pub fn verify(&self, authorization: Option<&str>) -> Result<String, AuthError> {
        let header = authorization.ok_or(AuthError::InvalidToken)?;
        let token = match header.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => return Err(AuthError::InvalidToken),
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| AuthError::InvalidToken)?;

        self.users
            .get(&normalize_identifier(&data.claims.sub))
            .map(|user| user.email.clone())
            .ok_or(AuthError::InvalidToken)
    }
}
