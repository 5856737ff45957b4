use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    backend::{
        auth::{MagicLinkSender, SqliteAuth},
        sqlite::SqliteDatabase,
        Backend, Realtime,
    },
    config::AppConfig,
    db::DbPool,
    error::AppError,
    services::{storage::StorageService, trips::TripService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub backend: Backend,
    pub trips: TripService,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, backend: Backend) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        let trips = TripService::new(backend.clone());
        Self {
            config,
            backend,
            trips,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Wires the bundled backend: SQLite tables and auth, filesystem storage and
/// in-process realtime channels.
pub async fn bundled_backend(
    config: &AppConfig,
    db: DbPool,
    sender: Arc<dyn MagicLinkSender>,
) -> Result<Backend, AppError> {
    let storage = StorageService::new(config.storage_root.clone(), config.public_url.clone());
    storage.ensure_structure().await?;

    let realtime = Realtime::new();
    let auth = SqliteAuth::new(
        db.clone(),
        sender,
        config.magic_link_ttl,
        config.session_ttl,
    );
    let tables = SqliteDatabase::new(db, realtime.clone());
    Ok(Backend::new(
        Arc::new(auth),
        Arc::new(tables),
        Arc::new(storage),
        realtime,
    ))
}
