#![allow(dead_code)]

use std::{
    fmt,
    fs::File,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Duration;
use tempfile::TempDir;
use trip_organizer::{
    backend::{
        auth::{MemoryMagicLinkSender, SqliteAuth},
        sqlite::SqliteDatabase,
        Backend, BackendError, Database, Realtime,
    },
    config::AppConfig,
    db::{init_pool, run_migrations},
    models::{
        expense::{NewTripExpense, TripExpense},
        file::TripFile,
        member::{MemberRole, NewTripMember, TripMember},
        session::Session,
        trip::{NewTrip, Trip, TripChanges},
    },
    services::{storage::StorageService, trips::RealtimeSubscriptions},
    state::AppState,
};
use uuid::Uuid;

/// SQLite tables with call counters and a switch that makes expense inserts fail.
pub struct RecordingDatabase {
    inner: SqliteDatabase,
    calls: AtomicUsize,
    delete_trip_calls: AtomicUsize,
    fail_expense_inserts: AtomicBool,
}

impl RecordingDatabase {
    fn new(inner: SqliteDatabase) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            delete_trip_calls: AtomicUsize::new(0),
            fail_expense_inserts: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delete_trip_calls(&self) -> usize {
        self.delete_trip_calls.load(Ordering::SeqCst)
    }

    pub fn fail_expense_inserts(&self) {
        self.fail_expense_inserts.store(true, Ordering::SeqCst);
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn select_trips_for_member(&self, user_id: Uuid) -> Result<Vec<Trip>, BackendError> {
        self.record();
        self.inner.select_trips_for_member(user_id).await
    }

    async fn select_trip(&self, id: Uuid) -> Result<Option<Trip>, BackendError> {
        self.record();
        self.inner.select_trip(id).await
    }

    async fn insert_trip(&self, trip: &NewTrip) -> Result<Trip, BackendError> {
        self.record();
        self.inner.insert_trip(trip).await
    }

    async fn update_trip(
        &self,
        id: Uuid,
        changes: &TripChanges,
    ) -> Result<Option<Trip>, BackendError> {
        self.record();
        self.inner.update_trip(id, changes).await
    }

    async fn delete_trip(&self, id: Uuid) -> Result<bool, BackendError> {
        self.record();
        self.delete_trip_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_trip(id).await
    }

    async fn append_trip_file(
        &self,
        id: Uuid,
        file: &TripFile,
    ) -> Result<Option<Trip>, BackendError> {
        self.record();
        self.inner.append_trip_file(id, file).await
    }

    async fn remove_trip_file(&self, id: Uuid, path: &str) -> Result<Option<Trip>, BackendError> {
        self.record();
        self.inner.remove_trip_file(id, path).await
    }

    async fn select_members(&self, trip_id: Uuid) -> Result<Vec<TripMember>, BackendError> {
        self.record();
        self.inner.select_members(trip_id).await
    }

    async fn select_member(
        &self,
        trip_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TripMember>, BackendError> {
        self.record();
        self.inner.select_member(trip_id, user_id).await
    }

    async fn insert_member(&self, member: &NewTripMember) -> Result<TripMember, BackendError> {
        self.record();
        self.inner.insert_member(member).await
    }

    async fn update_member_role(
        &self,
        trip_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<Option<TripMember>, BackendError> {
        self.record();
        self.inner.update_member_role(trip_id, user_id, role).await
    }

    async fn delete_member(&self, trip_id: Uuid, user_id: Uuid) -> Result<bool, BackendError> {
        self.record();
        self.inner.delete_member(trip_id, user_id).await
    }

    async fn select_expenses(&self, trip_id: Uuid) -> Result<Vec<TripExpense>, BackendError> {
        self.record();
        self.inner.select_expenses(trip_id).await
    }

    async fn insert_expense(&self, expense: &NewTripExpense) -> Result<TripExpense, BackendError> {
        self.record();
        if self.fail_expense_inserts.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::other(
                "trip_expenses is unavailable",
            )));
        }
        self.inner.insert_expense(expense).await
    }

    async fn delete_expense(&self, trip_id: Uuid, id: Uuid) -> Result<bool, BackendError> {
        self.record();
        self.inner.delete_expense(trip_id, id).await
    }
}

/// A full application on a temporary SQLite file and storage directory.
pub struct TestApp {
    pub state: AppState,
    pub outbox: MemoryMagicLinkSender,
    pub db: Arc<RecordingDatabase>,
    pub storage_root: PathBuf,
    _realtime: RealtimeSubscriptions,
    _root: TempDir,
}

impl fmt::Debug for TestApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestApp")
            .field("storage_root", &self.storage_root)
            .finish()
    }
}

impl TestApp {
    pub async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for test app")?;
        let storage_root = root.path().join("storage");

        let db_path = root.path().join("trips.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            database_url,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage_root: storage_root.clone(),
            public_url: "http://localhost:3000".parse()?,
            cookie_secret: "test-cookie-secret".into(),
            magic_link_ttl: Duration::minutes(60),
            session_ttl: Duration::hours(1),
        };

        let pool = init_pool(&config.database_url).await?;
        run_migrations(&pool).await?;

        let storage = StorageService::new(storage_root.clone(), config.public_url.clone());
        storage.ensure_structure().await?;

        let outbox = MemoryMagicLinkSender::default();
        let realtime = Realtime::new();
        let auth = SqliteAuth::new(
            pool.clone(),
            Arc::new(outbox.clone()),
            config.magic_link_ttl,
            config.session_ttl,
        );
        let db = Arc::new(RecordingDatabase::new(SqliteDatabase::new(
            pool,
            realtime.clone(),
        )));
        let backend = Backend::new(
            Arc::new(auth),
            db.clone(),
            Arc::new(storage),
            realtime,
        );

        let state = AppState::new(config, backend);
        let realtime = state.trips.setup_realtime_subscriptions();
        Ok(Self {
            state,
            outbox,
            db,
            storage_root,
            _realtime: realtime,
            _root: root,
        })
    }

    /// Requests a magic link for `email` and follows it.
    pub async fn sign_in(&self, email: &str) -> anyhow::Result<Session> {
        let redirect = self.state.config.magic_link_redirect()?;
        self.state
            .backend
            .auth
            .sign_in_with_otp(email, &redirect)
            .await?;
        let link = self
            .outbox
            .last_link_for(email)
            .context("no magic link was sent")?;
        let token = magic_link_token(&link).context("magic link without token")?;
        Ok(self.state.backend.auth.verify_otp(&token).await?)
    }

    /// Every stored object whose file name ends with `suffix`.
    pub fn stored_objects_ending_with(&self, suffix: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut pending = vec![self.storage_root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.to_string_lossy().ends_with(suffix) {
                    found.push(path);
                }
            }
        }
        found
    }
}

pub fn magic_link_token(link: &url::Url) -> Option<String> {
    link.query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}
