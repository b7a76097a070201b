use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::infra::cache::RedisCache;
use crate::infra::db::Db;

const TOKEN_ISSUER: &str = "gim";
pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub token: String,
}

/// Check a new password against the account rules.
///
/// Returns the human-readable reason on rejection.
pub fn check_password_rules(password: &str, min_length: usize) -> Result<(), &'static str> {
    if password.chars().count() < min_length {
        return Err("password is too short");
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err("password must be at most 128 bytes");
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err("password must contain a letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("password must contain a digit");
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        return Err("password must contain a symbol");
    }
    Ok(())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn blacklist_cache_key(token_hash: &str) -> String {
    format!("auth:blacklist:{}", token_hash)
}

#[derive(Clone)]
pub struct AuthService {
    db: Db,
    cache: RedisCache,
    access_key: [u8; 32],
    access_ttl_minutes: u64,
}

impl AuthService {
    pub fn new(db: Db, cache: RedisCache, access_key: [u8; 32], access_ttl_minutes: u64) -> Self {
        Self {
            db,
            cache,
            access_key,
            access_ttl_minutes,
        }
    }

    /// Create an account. A duplicate email surfaces as a unique violation from sqlx.
    pub async fn register(&self, email: &str, password: &str) -> Result<Session> {
        let password_hash = hash_password(password)?;
        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id",
        )
        .bind(normalize_email(email))
        .bind(password_hash)
        .fetch_one(self.db.pool())
        .await?;

        let token = self.issue_token(user_id)?;
        Ok(Session { user_id, token })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Option<Session>> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE email = $1")
                .bind(normalize_email(email))
                .fetch_optional(self.db.pool())
                .await?;

        let Some((user_id, password_hash)) = row else {
            return Ok(None);
        };
        if !verify_password(password, &password_hash)? {
            return Ok(None);
        }

        sqlx::query("UPDATE users SET last_active_on = now() WHERE id = $1")
            .bind(user_id)
            .execute(self.db.pool())
            .await?;

        let token = self.issue_token(user_id)?;
        Ok(Some(Session { user_id, token }))
    }

    /// Resolve a bearer token to its user. Blacklisted tokens and tokens of
    /// deleted accounts resolve to `None`.
    pub async fn authenticate(&self, token: &str) -> Result<Option<AuthSession>> {
        let claims = match self.decrypt_claims(token)? {
            Some(claims) => claims,
            None => return Ok(None),
        };
        let user_id = claim_uuid(&claims, "sub")?;

        if self.is_blacklisted(token).await? {
            return Ok(None);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(self.db.pool())
            .await?;
        if !exists {
            return Ok(None);
        }

        Ok(Some(AuthSession { user_id }))
    }

    /// Invalidate a token before its natural expiry.
    pub async fn logout(&self, token: &str) -> Result<()> {
        let token_hash = hash_token(token);
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(self.access_ttl_minutes as i64);

        sqlx::query(
            "INSERT INTO blacklisted_tokens (token_hash, expires_at) VALUES ($1, $2) \
             ON CONFLICT (token_hash) DO NOTHING",
        )
        .bind(&token_hash)
        .bind(expires_at)
        .execute(self.db.pool())
        .await?;

        if let Err(err) = self
            .cache
            .mark(&blacklist_cache_key(&token_hash), self.access_ttl_minutes * 60)
            .await
        {
            warn!(error = ?err, "failed to cache blacklisted token");
        }
        Ok(())
    }

    async fn is_blacklisted(&self, token: &str) -> Result<bool> {
        let token_hash = hash_token(token);
        match self.cache.is_marked(&blacklist_cache_key(&token_hash)).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => warn!(error = ?err, "blacklist cache unavailable"),
        }

        let listed: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM blacklisted_tokens WHERE token_hash = $1)",
        )
        .bind(&token_hash)
        .fetch_one(self.db.pool())
        .await?;
        Ok(listed)
    }

    pub fn issue_token(&self, user_id: Uuid) -> Result<String> {
        let duration = std::time::Duration::from_secs(self.access_ttl_minutes * 60);
        let mut claims = Claims::new_expires_in(&duration)?;
        claims.issuer(TOKEN_ISSUER)?;
        claims.audience(TOKEN_ISSUER)?;
        claims.subject(&user_id.to_string())?;
        claims.token_identifier(&Uuid::new_v4().to_string())?;

        let key = SymmetricKey::<V4>::from(&self.access_key)?;
        Ok(local::encrypt(&key, &claims, None, None)?)
    }

    fn decrypt_claims(&self, token: &str) -> Result<Option<Claims>> {
        let key = SymmetricKey::<V4>::from(&self.access_key)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(TOKEN_ISSUER);
        rules.validate_audience_with(TOKEN_ISSUER);

        let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        Ok(trusted.payload_claims().cloned())
    }
}

pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

pub(crate) fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| anyhow!("failed to parse password hash: {}", err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn claim_uuid(claims: &Claims, name: &str) -> Result<Uuid> {
    let value = claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing {} claim", name))?;
    Ok(Uuid::parse_str(value)?)
}
