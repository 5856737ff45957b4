//! Facade over the managed backend: auth, tables, object storage and
//! realtime change channels.
//!
//! Controllers only see the traits below. The bundled implementations run on
//! SQLite, the local filesystem and in-process broadcast channels.

pub mod auth;
pub mod realtime;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

use crate::models::{
    expense::{NewTripExpense, TripExpense},
    file::{TripFile, Upload},
    member::{MemberRole, NewTripMember, TripMember},
    session::Session,
    trip::{NewTrip, Trip, TripChanges},
    user::User,
};

pub use realtime::{ChangeEvent, ChangeOp, Realtime, Table};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
        }
    }
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_in_with_otp(&self, email: &str, redirect_to: &Url) -> Result<(), BackendError>;
    /// Consumes the token once and creates the user on first use.
    async fn verify_otp(&self, token: &str) -> Result<Session, BackendError>;
    async fn get_session(&self, access_token: &str) -> Result<Option<Session>, BackendError>;
    async fn get_user(&self, access_token: &str) -> Result<Option<User>, BackendError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, BackendError>;
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn select_trips_for_member(&self, user_id: Uuid) -> Result<Vec<Trip>, BackendError>;
    async fn select_trip(&self, id: Uuid) -> Result<Option<Trip>, BackendError>;
    async fn insert_trip(&self, trip: &NewTrip) -> Result<Trip, BackendError>;
    async fn update_trip(
        &self,
        id: Uuid,
        changes: &TripChanges,
    ) -> Result<Option<Trip>, BackendError>;
    async fn delete_trip(&self, id: Uuid) -> Result<bool, BackendError>;
    async fn append_trip_file(&self, id: Uuid, file: &TripFile)
        -> Result<Option<Trip>, BackendError>;
    async fn remove_trip_file(&self, id: Uuid, path: &str) -> Result<Option<Trip>, BackendError>;

    async fn select_members(&self, trip_id: Uuid) -> Result<Vec<TripMember>, BackendError>;
    async fn select_member(
        &self,
        trip_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TripMember>, BackendError>;
    async fn insert_member(&self, member: &NewTripMember) -> Result<TripMember, BackendError>;
    async fn update_member_role(
        &self,
        trip_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<Option<TripMember>, BackendError>;
    async fn delete_member(&self, trip_id: Uuid, user_id: Uuid) -> Result<bool, BackendError>;

    async fn select_expenses(&self, trip_id: Uuid) -> Result<Vec<TripExpense>, BackendError>;
    async fn insert_expense(&self, expense: &NewTripExpense) -> Result<TripExpense, BackendError>;
    async fn delete_expense(&self, trip_id: Uuid, id: Uuid) -> Result<bool, BackendError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, bucket: &str, path: &str, upload: &Upload) -> Result<(), BackendError>;
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthApi>,
    pub db: Arc<dyn Database>,
    pub storage: Arc<dyn ObjectStorage>,
    pub realtime: Realtime,
}

impl Backend {
    pub fn new(
        auth: Arc<dyn AuthApi>,
        db: Arc<dyn Database>,
        storage: Arc<dyn ObjectStorage>,
        realtime: Realtime,
    ) -> Self {
        Self {
            auth,
            db,
            storage,
            realtime,
        }
    }
}
