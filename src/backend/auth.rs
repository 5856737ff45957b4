use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::{AuthApi, AuthEvent, BackendError};
use crate::{
    db::DbPool,
    models::{session::Session, user::User},
};

/// Delivery of magic links. The managed platform sends an email; locally the
/// link is written to the log.
#[async_trait]
pub trait MagicLinkSender: Send + Sync {
    async fn send(&self, email: &str, link: &Url) -> Result<(), BackendError>;
}

#[derive(Clone, Default)]
pub struct LogMagicLinkSender;

#[async_trait]
impl MagicLinkSender for LogMagicLinkSender {
    async fn send(&self, email: &str, link: &Url) -> Result<(), BackendError> {
        info!(%email, %link, "magic link issued");
        Ok(())
    }
}

/// Keeps every issued link in memory so it can be followed without a mailbox.
#[derive(Clone, Default)]
pub struct MemoryMagicLinkSender {
    sent: Arc<Mutex<Vec<(String, Url)>>>,
}

impl MemoryMagicLinkSender {
    pub fn last_link_for(&self, email: &str) -> Option<Url> {
        let sent = self.sent.lock().ok()?;
        sent.iter()
            .rev()
            .find(|(to, _)| to.eq_ignore_ascii_case(email))
            .map(|(_, link)| link.clone())
    }
}

#[async_trait]
impl MagicLinkSender for MemoryMagicLinkSender {
    async fn send(&self, email: &str, link: &Url) -> Result<(), BackendError> {
        self.sent
            .lock()
            .map_err(|_| BackendError::Other(anyhow::anyhow!("magic link outbox poisoned")))?
            .push((email.to_string(), link.clone()));
        Ok(())
    }
}

pub struct SqliteAuth {
    pool: DbPool,
    sender: Arc<dyn MagicLinkSender>,
    events: broadcast::Sender<AuthEvent>,
    otp_ttl: Duration,
    session_ttl: Duration,
}

impl SqliteAuth {
    pub fn new(
        pool: DbPool,
        sender: Arc<dyn MagicLinkSender>,
        otp_ttl: Duration,
        session_ttl: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            pool,
            sender,
            events,
            otp_ttl,
            session_ttl,
        }
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, BackendError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn upsert_user(&self, email: &str, now: DateTime<Utc>) -> Result<User, BackendError> {
        let user = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, email, created_at, last_sign_in_at)
               VALUES (?1, ?2, ?3, ?3)
               ON CONFLICT(email) DO UPDATE SET last_sign_in_at = excluded.last_sign_in_at
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    fn emit(&self, event: AuthEvent) {
        debug!(event = event.name(), "auth state changed");
        let _ = self.events.send(event);
    }
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn normalize_email(email: &str) -> Result<String, BackendError> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(BackendError::Invalid(format!("'{email}' is not an email address"))),
    }
}

#[async_trait]
impl AuthApi for SqliteAuth {
    async fn sign_in_with_otp(&self, email: &str, redirect_to: &Url) -> Result<(), BackendError> {
        let email = normalize_email(email)?;
        let token = new_token();
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO auth_otps (token_hash, email, redirect_to, created_at, expires_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(hash_token(&token))
        .bind(&email)
        .bind(redirect_to.as_str())
        .bind(now)
        .bind(now + self.otp_ttl)
        .execute(&self.pool)
        .await?;

        let mut link = redirect_to.clone();
        link.query_pairs_mut().append_pair("token", &token);
        self.sender.send(&email, &link).await
    }

    async fn verify_otp(&self, token: &str) -> Result<Session, BackendError> {
        let now = Utc::now();
        let claimed: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            r#"UPDATE auth_otps SET consumed_at = ?1
               WHERE token_hash = ?2 AND consumed_at IS NULL
               RETURNING email, expires_at"#,
        )
        .bind(now)
        .bind(hash_token(token.trim()))
        .fetch_optional(&self.pool)
        .await?;
        let Some((email, expires_at)) = claimed else {
            return Err(BackendError::InvalidToken);
        };
        if expires_at <= now {
            return Err(BackendError::InvalidToken);
        }

        let user = self.upsert_user(&email, now).await?;
        let session = Session {
            access_token: new_token(),
            user,
            created_at: now,
            expires_at: now + self.session_ttl,
        };
        sqlx::query(
            r#"INSERT INTO sessions (access_token, user_id, created_at, expires_at)
               VALUES (?1, ?2, ?3, ?4)"#,
        )
        .bind(&session.access_token)
        .bind(session.user.id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        info!(user_id = %session.user.id, "magic link verified");
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn get_session(&self, access_token: &str) -> Result<Option<Session>, BackendError> {
        let row: Option<(Uuid, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT user_id, created_at, expires_at FROM sessions WHERE access_token = ?1",
        )
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?;
        let Some((user_id, created_at, expires_at)) = row else {
            return Ok(None);
        };
        let Some(user) = self.user_by_id(user_id).await? else {
            return Ok(None);
        };
        let session = Session {
            access_token: access_token.to_string(),
            user,
            created_at,
            expires_at,
        };
        Ok(session.is_live_at(Utc::now()).then_some(session))
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<User>, BackendError> {
        Ok(self
            .get_session(access_token)
            .await?
            .map(|session| session.user))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM sessions WHERE access_token = ?1")
            .bind(access_token)
            .execute(&self.pool)
            .await?;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, BackendError> {
        let email = normalize_email(email)?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
