//! Routes of the trip organizer app, nested under `/apps/trip`.

use std::convert::Infallible;

use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, Redirect, Response,
    },
    routing::{get, post},
    Form, Router,
};
use chrono::Local;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    auth::{CurrentSession, CurrentUser},
    backend::Table,
    error::{AppError, TripError},
    models::{
        file::Upload,
        member::MemberRole,
        session::Session,
        trip::{TripChanges, TripStatus},
    },
    services::{
        subscribers::SubscriptionToken,
        trips::{parse_date, NewExpenseRequest, NewTripRequest, TripService},
    },
    shell::AppId,
    state::AppState,
    views::{
        pages::AppContainerPage,
        trip::{ModalState, TripDraft, TripView},
        Toast,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trips", post(create_trip))
        .route("/trips/:id", post(update_trip))
        .route("/trips/:id/delete", post(delete_trip))
        .route("/trips/:id/members", post(add_member))
        .route("/trips/:id/members/:user_id", post(change_member_role))
        .route("/trips/:id/members/:user_id/delete", post(remove_member))
        .route("/trips/:id/expenses", post(add_expense))
        .route("/trips/:id/expenses/:expense_id/delete", post(remove_expense))
        .route("/trips/:id/files", post(upload_file))
        .route("/trips/:id/files/delete", post(delete_file))
        .route("/fragments/list", get(list_fragment))
        .route("/fragments/trips/:id", get(details_fragment))
        .route("/events", get(change_events))
}

#[derive(Debug, Default, Deserialize)]
pub struct TripPageQuery {
    pub trip: Option<Uuid>,
    pub new: Option<String>,
}

struct PageState {
    selected: Option<Uuid>,
    modal: ModalState,
    draft: TripDraft,
    toasts: Vec<Toast>,
    status: StatusCode,
}

impl PageState {
    fn showing(selected: Option<Uuid>) -> Self {
        Self {
            selected,
            modal: ModalState::Closed,
            draft: TripDraft::default(),
            toasts: Vec::new(),
            status: StatusCode::OK,
        }
    }

    fn failed(selected: Option<Uuid>, err: &TripError) -> Self {
        Self {
            toasts: vec![Toast::error(err.to_string())],
            status: err.status(),
            ..Self::showing(selected)
        }
    }
}

pub async fn open(
    state: &AppState,
    session: &Session,
    query: TripPageQuery,
) -> Result<Response, AppError> {
    let mut page = PageState::showing(query.trip);
    if query.new.is_some() {
        page.modal = ModalState::Open;
    }
    render_page(&state.trips, session, page).await
}

async fn render_page(
    trips: &TripService,
    session: &Session,
    mut page: PageState,
) -> Result<Response, AppError> {
    let view = TripView::new();
    let user = &session.user;

    let list = match trips.get_trips_by_user(user.id).await {
        Ok(list) => list,
        Err(err) => {
            error!(user_id = %user.id, "loading trips failed: {err:?}");
            page.toasts.push(Toast::error(err.to_string()));
            Vec::new()
        }
    };
    let details = match page.selected {
        Some(trip_id) => match trips.get_trip_details(user, trip_id).await {
            Ok(details) => Some(details),
            Err(err) => {
                warn!(%trip_id, user_id = %user.id, kind = err.kind(), "trip details unavailable: {err}");
                page.toasts.push(Toast::error(err.to_string()));
                None
            }
        },
        None => None,
    };

    let list_html = view.render_list(&list, page.selected)?;
    let details_html = view.render_details(details.as_ref())?;
    let app_markup = view.render_app(&list_html, &details_html, page.modal, &page.draft)?;

    let app = AppId::Trip;
    Ok((
        page.status,
        AskamaTemplateResponse::into_response(AppContainerPage {
            email: user.email.clone(),
            app_id: app.as_str(),
            app_title: app.title(),
            app_markup,
            toasts: page.toasts,
        }),
    )
        .into_response())
}

fn signed_in(current: CurrentSession) -> Result<Session, AppError> {
    current.0.ok_or(AppError::Unauthorized)
}

fn show_trip(trip_id: Uuid) -> Redirect {
    Redirect::to(&format!("/apps/trip?trip={trip_id}"))
}

/// Either back to the trip on success, or the page again with the error toast.
async fn finish(
    state: &AppState,
    session: &Session,
    trip_id: Uuid,
    outcome: Result<(), TripError>,
) -> Result<Response, AppError> {
    match outcome {
        Ok(()) => Ok(show_trip(trip_id).into_response()),
        Err(err) => {
            log_failure(session, &err);
            render_page(&state.trips, session, PageState::failed(Some(trip_id), &err)).await
        }
    }
}

fn log_failure(session: &Session, err: &TripError) {
    match err {
        TripError::Persistence { .. } => {
            error!(user_id = %session.user.id, "trip operation failed: {err:?}")
        }
        _ => warn!(user_id = %session.user.id, kind = err.kind(), "trip operation rejected: {err}"),
    }
}

async fn create_trip(
    State(state): State<AppState>,
    current: CurrentSession,
    Form(request): Form<NewTripRequest>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let draft = TripDraft {
        title: request.title.clone(),
        location: request.location.clone(),
        start_date: request.start_date.clone(),
        end_date: request.end_date.clone(),
        description: request.description.clone(),
        budget: request.budget.map(|b| b.to_string()).unwrap_or_default(),
        currency: request.currency.clone(),
    };
    match state.trips.create_trip(&session.user, request).await {
        Ok(trip) => Ok(show_trip(trip.id).into_response()),
        Err(err) => {
            log_failure(&session, &err);
            let page = PageState {
                modal: ModalState::Open,
                draft,
                ..PageState::failed(None, &err)
            };
            render_page(&state.trips, &session, page).await
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TripUpdateForm {
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    #[serde(default)]
    start_date: String,
    #[serde(default)]
    end_date: String,
    budget: Option<String>,
    currency: Option<String>,
    #[serde(default)]
    status: String,
}

impl TripUpdateForm {
    fn into_changes(self) -> Result<TripChanges, TripError> {
        let optional_date = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Ok(None)
            } else {
                parse_date(field, value).map(Some)
            }
        };
        let status = if self.status.trim().is_empty() {
            None
        } else {
            Some(
                self.status
                    .parse::<TripStatus>()
                    .map_err(TripError::validation)?,
            )
        };
        // Absent leaves the budget alone, blank clears it.
        let budget = match self.budget.as_deref().map(str::trim) {
            None => None,
            Some("") => Some(None),
            Some(raw) => Some(Some(raw.parse::<f64>().map_err(|_| {
                TripError::validation("Budget must be a number")
            })?)),
        };
        Ok(TripChanges {
            title: self.title,
            description: self.description.map(|text| text.trim().to_string()),
            location: self.location.map(|text| text.trim().to_string()),
            start_date: optional_date("Start date", &self.start_date)?,
            end_date: optional_date("End date", &self.end_date)?,
            budget,
            currency: self.currency.map(|code| code.trim().to_uppercase()),
            status,
        })
    }
}

async fn update_trip(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(trip_id): Path<Uuid>,
    Form(form): Form<TripUpdateForm>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let outcome = match form.into_changes() {
        Ok(changes) => state
            .trips
            .update_trip(&session.user, trip_id, changes)
            .await
            .map(|_| ()),
        Err(err) => Err(err),
    };
    finish(&state, &session, trip_id, outcome).await
}

async fn delete_trip(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(trip_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    match state.trips.delete_trip(&session.user, trip_id).await {
        Ok(()) => Ok(Redirect::to("/apps/trip").into_response()),
        Err(err) => finish(&state, &session, trip_id, Err(err)).await,
    }
}

#[derive(Debug, Deserialize)]
struct MemberForm {
    #[serde(default)]
    email: String,
    role: String,
}

fn parse_role(raw: &str) -> Result<MemberRole, TripError> {
    raw.parse::<MemberRole>().map_err(TripError::validation)
}

async fn add_member(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(trip_id): Path<Uuid>,
    Form(form): Form<MemberForm>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let outcome = match parse_role(&form.role) {
        Ok(role) => state
            .trips
            .add_trip_member(&session.user, trip_id, &form.email, role)
            .await
            .map(|_| ()),
        Err(err) => Err(err),
    };
    finish(&state, &session, trip_id, outcome).await
}

async fn change_member_role(
    State(state): State<AppState>,
    current: CurrentSession,
    Path((trip_id, user_id)): Path<(Uuid, Uuid)>,
    Form(form): Form<MemberForm>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let outcome = match parse_role(&form.role) {
        Ok(role) => state
            .trips
            .update_member_role(&session.user, trip_id, user_id, role)
            .await
            .map(|_| ()),
        Err(err) => Err(err),
    };
    finish(&state, &session, trip_id, outcome).await
}

async fn remove_member(
    State(state): State<AppState>,
    current: CurrentSession,
    Path((trip_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let outcome = state
        .trips
        .remove_trip_member(&session.user, trip_id, user_id)
        .await;
    finish(&state, &session, trip_id, outcome).await
}

#[derive(Default)]
struct MultipartForm {
    fields: Vec<(String, String)>,
    upload: Option<Upload>,
}

impl MultipartForm {
    async fn read(mut multipart: Multipart, file_field: &str) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| AppError::BadRequest(err.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == file_field {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::BadRequest(err.body_text()))?;
                if !file_name.is_empty() && !bytes.is_empty() {
                    form.upload = Some(Upload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::BadRequest(err.body_text()))?;
                form.fields.push((name, value));
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }

    fn expense_request(&self) -> Result<NewExpenseRequest, TripError> {
        let amount = self
            .text("amount")
            .trim()
            .parse::<f64>()
            .map_err(|_| TripError::validation("Amount must be a number"))?;
        let date = match self.text("date").trim() {
            "" => Local::now().date_naive(),
            raw => parse_date("Date", raw)?,
        };
        Ok(NewExpenseRequest {
            amount,
            currency: self.text("currency").to_string(),
            category: self.text("category").to_string(),
            description: Some(self.text("description").to_string()),
            date,
        })
    }
}

async fn add_expense(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(trip_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let mut form = MultipartForm::read(multipart, "receipt").await?;
    let outcome = match form.expense_request() {
        Ok(request) => state
            .trips
            .add_expense(&session.user, trip_id, request, form.upload.take())
            .await
            .map(|_| ()),
        Err(err) => Err(err),
    };
    finish(&state, &session, trip_id, outcome).await
}

async fn remove_expense(
    State(state): State<AppState>,
    current: CurrentSession,
    Path((trip_id, expense_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let outcome = state
        .trips
        .remove_expense(&session.user, trip_id, expense_id)
        .await;
    finish(&state, &session, trip_id, outcome).await
}

async fn upload_file(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(trip_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let form = MultipartForm::read(multipart, "file").await?;
    let outcome = match form.upload {
        Some(upload) => state
            .trips
            .upload_trip_file(&session.user, trip_id, upload)
            .await
            .map(|_| ()),
        None => Err(TripError::validation("Choose a file to upload")),
    };
    finish(&state, &session, trip_id, outcome).await
}

#[derive(Debug, Deserialize)]
struct FileForm {
    path: String,
}

async fn delete_file(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(trip_id): Path<Uuid>,
    Form(form): Form<FileForm>,
) -> Result<Response, AppError> {
    let session = signed_in(current)?;
    let outcome = state
        .trips
        .delete_trip_file(&session.user, trip_id, &form.path)
        .await;
    finish(&state, &session, trip_id, outcome).await
}

#[derive(Debug, Deserialize)]
struct ListFragmentQuery {
    trip: Option<Uuid>,
}

async fn list_fragment(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<ListFragmentQuery>,
) -> Result<Html<String>, AppError> {
    let user = current.require_user()?;
    let trips = state.trips.get_trips_by_user(user.id).await?;
    Ok(Html(TripView::new().render_list(&trips, query.trip)?))
}

/// Details panel for one trip. A trip that vanished or that the caller lost
/// access to renders as the empty selection.
async fn details_fragment(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<Uuid>,
) -> Result<Html<String>, AppError> {
    let user = current.require_user()?;
    let details = match state.trips.get_trip_details(user, trip_id).await {
        Ok(details) => Some(details),
        Err(TripError::NotFound(_) | TripError::Authorization(_)) => None,
        Err(err) => return Err(err.into()),
    };
    Ok(Html(TripView::new().render_details(details.as_ref())?))
}

/// Unsubscribes the stream's listeners once the client goes away.
struct SubscriptionGuard {
    trips: TripService,
    tokens: Vec<SubscriptionToken>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.trips.unsubscribe(token);
        }
        debug!("change stream closed");
    }
}

async fn change_events(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    current.require_user()?;
    let (sender, receiver) = mpsc::unbounded_channel::<Event>();
    let tokens = Table::ALL
        .into_iter()
        .map(|table| {
            let sender = sender.clone();
            state.trips.subscribe(table, move |change| {
                match Event::default().event("change").json_data(change) {
                    Ok(event) => {
                        let _ = sender.send(event);
                    }
                    Err(err) => warn!(%table, "change event not encodable: {err}"),
                }
            })
        })
        .collect();
    let guard = SubscriptionGuard {
        trips: state.trips.clone(),
        tokens,
    };
    let stream = UnboundedReceiverStream::new(receiver).map(move |event| {
        let _ = &guard;
        Ok::<_, Infallible>(event)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn blank_update_fields_leave_dates_and_status_alone() {
        let changes = TripUpdateForm {
            title: Some("Rome".into()),
            ..TripUpdateForm::default()
        }
        .into_changes()
        .expect("valid");
        assert_eq!(changes.title.as_deref(), Some("Rome"));
        assert!(changes.start_date.is_none());
        assert!(changes.status.is_none());
    }

    #[test]
    fn update_form_parses_status_and_dates() {
        let changes = TripUpdateForm {
            start_date: "2024-02-01".into(),
            status: "active".into(),
            currency: Some(" usd ".into()),
            ..TripUpdateForm::default()
        }
        .into_changes()
        .expect("valid");
        assert_eq!(changes.start_date, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(changes.status, Some(TripStatus::Active));
        assert_eq!(changes.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn budget_is_kept_cleared_or_set() {
        let kept = TripUpdateForm::default().into_changes().expect("valid");
        assert_eq!(kept.budget, None);

        let cleared = TripUpdateForm {
            budget: Some("  ".into()),
            ..TripUpdateForm::default()
        }
        .into_changes()
        .expect("valid");
        assert_eq!(cleared.budget, Some(None));

        let set = TripUpdateForm {
            budget: Some("1500".into()),
            ..TripUpdateForm::default()
        }
        .into_changes()
        .expect("valid");
        assert_eq!(set.budget, Some(Some(1500.0)));

        let err = TripUpdateForm {
            budget: Some("lots".into()),
            ..TripUpdateForm::default()
        }
        .into_changes()
        .unwrap_err();
        assert!(matches!(err, TripError::Validation(_)));
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        let err = TripUpdateForm {
            status: "lost".into(),
            ..TripUpdateForm::default()
        }
        .into_changes()
        .unwrap_err();
        assert!(matches!(err, TripError::Validation(_)));
    }

    #[test]
    fn expense_amount_must_parse() {
        let form = MultipartForm {
            fields: vec![("amount".into(), "ten".into())],
            upload: None,
        };
        assert!(matches!(
            form.expense_request(),
            Err(TripError::Validation(_))
        ));
    }

    #[test]
    fn expense_fields_are_collected() {
        let form = MultipartForm {
            fields: vec![
                ("amount".into(), "12.5".into()),
                ("currency".into(), "eur".into()),
                ("category".into(), "food".into()),
                ("date".into(), "2024-01-02".into()),
            ],
            upload: None,
        };
        let request = form.expense_request().expect("valid");
        assert_eq!(request.amount, 12.5);
        assert_eq!(request.category, "food");
        assert_eq!(request.date, NaiveDate::from_ymd_opt(2024, 1, 2).expect("date"));
    }
}
