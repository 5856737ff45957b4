use std::sync::Arc;

use tokio::{net::TcpListener, sync::broadcast::error::RecvError};
use tracing::{error, info};
use trip_organizer::{
    backend::auth::LogMagicLinkSender,
    config::AppConfig,
    db::{init_pool, run_migrations},
    error::AppError,
    routes::create_router,
    state::{bundled_backend, AppState},
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;

    if let Err(err) = run_migrations(&db).await {
        error!("migration failed: {err:?}");
        return Err(err);
    }

    let backend = bundled_backend(&config, db, Arc::new(LogMagicLinkSender)).await?;
    let state = AppState::new(config.clone(), backend);
    let _realtime = state.trips.setup_realtime_subscriptions();

    let mut auth_events = state.backend.auth.on_auth_state_change();
    tokio::spawn(async move {
        loop {
            match auth_events.recv().await {
                Ok(event) => info!(event = event.name(), "auth state changed"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    info!("magic links redirect to {}", config.magic_link_redirect()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,trip_organizer=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
