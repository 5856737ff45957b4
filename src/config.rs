use std::{env, net::SocketAddr, path::PathBuf};

use chrono::Duration;
use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub storage_root: PathBuf,
    /// Base URL the browser reaches the app on; magic links and public object
    /// URLs are built from it.
    pub public_url: Url,
    pub cookie_secret: String,
    pub magic_link_ttl: Duration,
    pub session_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://trips.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let storage_root = env::var("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("storage"));

        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{listen_addr}"))
            .parse::<Url>()
            .map_err(|err| AppError::Config(format!("invalid PUBLIC_URL: {err}")))?;

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-trip-organizer-cookie-secret".to_string());

        let magic_link_ttl = Duration::minutes(parse_number("MAGIC_LINK_TTL_MINUTES", 60)?);
        let session_ttl = Duration::hours(parse_number("SESSION_TTL_HOURS", 24 * 7)?);

        Ok(Self {
            database_url,
            listen_addr,
            storage_root,
            public_url,
            cookie_secret,
            magic_link_ttl,
            session_ttl,
        })
    }

    pub fn magic_link_redirect(&self) -> Result<Url, AppError> {
        self.public_url
            .join("/auth/callback")
            .map_err(|err| AppError::Config(format!("invalid PUBLIC_URL: {err}")))
    }
}

fn parse_number(name: &str, default: i64) -> Result<i64, AppError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(AppError::Config(format!(
                "invalid {name}: expected a positive number, got '{raw}'"
            ))),
        },
        Err(_) => Ok(default),
    }
}
