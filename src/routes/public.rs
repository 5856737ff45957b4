use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{
    auth::{self, CurrentSession},
    backend::{AuthEvent, BackendError},
    error::AppError,
    routes::trip::{self, TripPageQuery},
    shell::{AppId, Shell, ShellError, ShellView},
    state::AppState,
    views::{
        pages::{AuthPage, DashboardPage},
        Toast,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/auth/otp", post(request_magic_link))
        .route("/auth/callback", get(magic_link_callback))
        .route("/logout", post(logout))
        .route("/dashboard", get(back_to_dashboard))
        .route("/apps/:app_id", get(open_app))
}

async fn index(current: CurrentSession) -> Response {
    let shell = Shell::boot(current.0.as_ref());
    match (shell.view(), current.0) {
        (ShellView::Dashboard, Some(session)) => {
            AskamaTemplateResponse::into_response(DashboardPage::new(session.user.email, Vec::new()))
        }
        _ => auth_screen(String::new(), Vec::new(), StatusCode::OK),
    }
}

fn auth_screen(email: String, toasts: Vec<Toast>, status: StatusCode) -> Response {
    (
        status,
        AskamaTemplateResponse::into_response(AuthPage { email, toasts }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct MagicLinkForm {
    email: String,
}

async fn request_magic_link(
    State(state): State<AppState>,
    Form(form): Form<MagicLinkForm>,
) -> Result<Response, AppError> {
    let redirect_to = state.config.magic_link_redirect()?;
    let email = form.email.trim().to_string();
    match state
        .backend
        .auth
        .sign_in_with_otp(&email, &redirect_to)
        .await
    {
        Ok(()) => Ok(auth_screen(
            email.clone(),
            vec![Toast::info(format!(
                "Magic link sent! Check your email ({email}). The link will redirect to: {redirect_to}"
            ))],
            StatusCode::OK,
        )),
        Err(BackendError::Invalid(message)) => Ok(auth_screen(
            email,
            vec![Toast::error(format!("Authentication error: {message}"))],
            StatusCode::BAD_REQUEST,
        )),
        Err(err) => {
            error!("magic link request failed: {err:?}");
            Ok(auth_screen(
                email,
                vec![Toast::error("Authentication error: could not send magic link")],
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

#[derive(Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    token: String,
}

async fn magic_link_callback(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    match state.backend.auth.verify_otp(&query.token).await {
        Ok(session) => {
            info!(user_id = %session.user.id, "signed in");
            let jar = auth::apply_session_cookie(jar, &session);
            let mut shell = Shell::boot(None);
            shell.on_auth_event(&AuthEvent::SignedIn(session));
            Ok((jar, Redirect::to(&shell.location())).into_response())
        }
        Err(BackendError::InvalidToken) => {
            warn!("magic link rejected");
            Ok(auth_screen(
                String::new(),
                vec![Toast::error("This sign-in link is invalid or has expired")],
                StatusCode::BAD_REQUEST,
            ))
        }
        Err(err) => Err(err.into()),
    }
}

async fn logout(
    State(state): State<AppState>,
    current: CurrentSession,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    let mut shell = Shell::boot(current.0.as_ref());
    if let Some(session) = &current.0 {
        state.backend.auth.sign_out(&session.access_token).await?;
        info!(user_id = %session.user.id, "signed out");
    }
    shell.on_auth_event(&AuthEvent::SignedOut);
    Ok((auth::clear_session_cookie(jar), Redirect::to(&shell.location())))
}

#[derive(Deserialize)]
struct BackQuery {
    from: Option<String>,
}

async fn back_to_dashboard(current: CurrentSession, Query(query): Query<BackQuery>) -> Redirect {
    let mut shell = Shell::boot(current.0.as_ref());
    if let Some(app_id) = query.from.as_deref() {
        if let Err(err) = shell.select_app(app_id) {
            debug!(%app_id, "leaving app: {err}");
        }
    }
    shell.back();
    Redirect::to(&shell.location())
}

async fn open_app(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(app_id): Path<String>,
    Query(query): Query<TripPageQuery>,
) -> Result<Response, AppError> {
    let mut shell = Shell::boot(current.0.as_ref());
    let Some(session) = current.0 else {
        return Ok(Redirect::to("/").into_response());
    };
    match shell.select_app(&app_id) {
        Ok(AppId::Trip) => trip::open(&state, &session, query).await,
        Err(err @ ShellError::UnknownApp(_)) => {
            warn!(%app_id, "unknown app requested");
            Ok((
                StatusCode::NOT_FOUND,
                AskamaTemplateResponse::into_response(DashboardPage::new(
                    session.user.email,
                    vec![Toast::error(err.to_string())],
                )),
            )
                .into_response())
        }
        Err(ShellError::SignedOut) => Ok(Redirect::to("/").into_response()),
    }
}
