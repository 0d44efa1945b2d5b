//! # um-auth-jwt
//!
//! Argon2 + JWT implementation of `AuthProvider`.
//! Hashes account passwords and issues/verifies HS256 bearer tokens whose
//! `sub` claim is the user id.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use um_core::error::{AppError, Result};
use um_core::models::UserId;
use um_core::traits::AuthProvider;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    iat: i64,
    exp: i64,
}

pub struct JwtAuthProvider {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
}

impl JwtAuthProvider {
    /// Accepts the signing secret (e.g., from `auth.jwt_secret`) and the token lifetime.
    pub fn new(secret: &SecretString, token_ttl_hours: i64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation: Validation::new(Algorithm::HS256),
            token_ttl: Duration::hours(token_ttl_hours),
        }
    }
}

impl AuthProvider for JwtAuthProvider {
    fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| {
                error!(error = %err, "password hashing failed");
                AppError::Internal("password hashing failed".into())
            })
    }

    /// Verifies if a provided password matches a stored Argon2 hash.
    fn verify_password(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(_) => return false,
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    fn issue_token(&self, user_id: UserId) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.0,
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|err| {
            error!(error = %err, "token signing failed");
            AppError::Internal("token signing failed".into())
        })
    }

    fn verify_token(&self, token: &str) -> Result<UserId> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| UserId(data.claims.sub))
            .map_err(|err| {
                debug!(error = %err, "rejected bearer token");
                AppError::Unauthorized("invalid or expired token".into())
            })
    }
}
