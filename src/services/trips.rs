use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_with::{serde_as, NoneAsEmptyString};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{Backend, ChangeEvent, Table},
    error::TripError,
    models::{
        expense::{NewTripExpense, TripExpense},
        file::{TripFile, Upload},
        member::{MemberRole, NewTripMember, TripMember},
        trip::{expense_totals, NewTrip, Trip, TripChanges, TripDetails},
        user::User,
    },
    services::{
        storage::TRIP_FILES_BUCKET,
        subscribers::{Subscribers, SubscriptionToken},
    },
};

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTripRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub description: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub currency: String,
}

impl NewTripRequest {
    pub fn validate(&self, user_id: Uuid) -> Result<NewTrip, TripError> {
        let title = required_title(&self.title)?;
        let start_date = parse_date("Start date", &self.start_date)?;
        let end_date = parse_date("End date", &self.end_date)?;
        check_date_order(start_date, end_date)?;
        check_budget(self.budget)?;
        Ok(NewTrip {
            user_id,
            title,
            description: normalize_optional(Some(self.description.clone())),
            location: normalize_optional(Some(self.location.clone())),
            start_date,
            end_date,
            budget: self.budget,
            currency: normalize_optional(Some(self.currency.clone()))
                .map(|currency| currency.to_uppercase()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewExpenseRequest {
    pub amount: f64,
    pub currency: String,
    pub category: String,
    pub description: Option<String>,
    pub date: NaiveDate,
}

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, TripError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TripError::validation(format!("{field} is required")));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| TripError::validation(format!("{field} '{value}' is not a valid date")))
}

pub fn normalize_optional(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn required_title(title: &str) -> Result<String, TripError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TripError::validation("Trip title is required"));
    }
    Ok(title.to_string())
}

fn check_date_order(start: NaiveDate, end: NaiveDate) -> Result<(), TripError> {
    if start > end {
        return Err(TripError::validation(
            "Start date must be on or before the end date",
        ));
    }
    Ok(())
}

fn check_budget(budget: Option<f64>) -> Result<(), TripError> {
    match budget {
        Some(amount) if !amount.is_finite() || amount < 0.0 => Err(TripError::validation(
            "Budget must be a non-negative amount",
        )),
        _ => Ok(()),
    }
}

/// Dropping the handle closes the forwarding tasks.
pub struct RealtimeSubscriptions {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for RealtimeSubscriptions {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct TripService {
    backend: Backend,
    subscribers: Subscribers,
}

impl TripService {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            subscribers: Subscribers::new(),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub async fn create_trip(
        &self,
        caller: &User,
        request: NewTripRequest,
    ) -> Result<Trip, TripError> {
        let new_trip = request.validate(caller.id)?;
        let trip = self
            .backend
            .db
            .insert_trip(&new_trip)
            .await
            .map_err(|err| TripError::backend("Failed to create trip", err))?;
        self.backend
            .db
            .insert_member(&NewTripMember {
                trip_id: trip.id,
                user_id: caller.id,
                email: caller.email.clone(),
                role: MemberRole::Owner,
            })
            .await
            .map_err(|err| TripError::backend("Failed to register trip owner", err))?;
        info!(trip_id = %trip.id, user_id = %caller.id, "trip created");
        Ok(trip)
    }

    pub async fn get_trips_by_user(&self, user_id: Uuid) -> Result<Vec<Trip>, TripError> {
        self.backend
            .db
            .select_trips_for_member(user_id)
            .await
            .map_err(|err| TripError::backend("Failed to load trips", err))
    }

    pub async fn get_trip_details(
        &self,
        caller: &User,
        trip_id: Uuid,
    ) -> Result<TripDetails, TripError> {
        let trip = self.load_trip(trip_id).await?;
        let role = self
            .role_of(&trip, caller)
            .await?
            .ok_or_else(|| TripError::authorization("You are not a member of this trip"))?;
        let members = self
            .backend
            .db
            .select_members(trip_id)
            .await
            .map_err(|err| TripError::backend("Failed to load trip members", err))?;
        let expenses = self
            .backend
            .db
            .select_expenses(trip_id)
            .await
            .map_err(|err| TripError::backend("Failed to load trip expenses", err))?;
        let (total_expenses, remaining_budget) = expense_totals(trip.budget, &expenses);
        Ok(TripDetails {
            trip,
            role,
            members,
            expenses,
            total_expenses,
            remaining_budget,
        })
    }

    pub async fn update_trip(
        &self,
        caller: &User,
        trip_id: Uuid,
        mut changes: TripChanges,
    ) -> Result<Trip, TripError> {
        let (trip, _) = self
            .require_role(caller, trip_id, MemberRole::can_edit, "edit this trip")
            .await?;
        if let Some(title) = changes.title.take() {
            changes.title = Some(required_title(&title)?);
        }
        check_date_order(
            changes.start_date.unwrap_or(trip.start_date),
            changes.end_date.unwrap_or(trip.end_date),
        )?;
        check_budget(changes.budget.flatten())?;
        if changes.is_empty() {
            return Ok(trip);
        }

        let updated = self
            .backend
            .db
            .update_trip(trip_id, &changes)
            .await
            .map_err(|err| TripError::backend("Failed to update trip", err))?
            .ok_or_else(|| TripError::not_found("Trip not found"))?;
        info!(%trip_id, user_id = %caller.id, "trip updated");
        Ok(updated)
    }

    pub async fn delete_trip(&self, caller: &User, trip_id: Uuid) -> Result<(), TripError> {
        self.require_role(caller, trip_id, MemberRole::can_delete, "delete this trip")
            .await?;
        let deleted = self
            .backend
            .db
            .delete_trip(trip_id)
            .await
            .map_err(|err| TripError::backend("Failed to delete trip", err))?;
        if !deleted {
            return Err(TripError::not_found("Trip not found"));
        }
        info!(%trip_id, user_id = %caller.id, "trip deleted");
        Ok(())
    }

    pub async fn add_trip_member(
        &self,
        caller: &User,
        trip_id: Uuid,
        email: &str,
        role: MemberRole,
    ) -> Result<TripMember, TripError> {
        self.require_role(
            caller,
            trip_id,
            MemberRole::can_manage_members,
            "manage members",
        )
        .await?;
        let user = self
            .backend
            .auth
            .find_user_by_email(email)
            .await
            .map_err(|err| TripError::backend("Failed to look up user", err))?
            .ok_or_else(|| TripError::not_found(format!("No user signed up as {}", email.trim())))?;
        let member = self
            .backend
            .db
            .insert_member(&NewTripMember {
                trip_id,
                user_id: user.id,
                email: user.email,
                role,
            })
            .await
            .map_err(|err| TripError::backend("Failed to add member", err))?;
        info!(%trip_id, member_id = %member.user_id, %role, "member added");
        Ok(member)
    }

    pub async fn update_member_role(
        &self,
        caller: &User,
        trip_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<TripMember, TripError> {
        self.require_role(
            caller,
            trip_id,
            MemberRole::can_manage_members,
            "manage members",
        )
        .await?;
        self.backend
            .db
            .update_member_role(trip_id, user_id, role)
            .await
            .map_err(|err| TripError::backend("Failed to update member role", err))?
            .ok_or_else(|| TripError::not_found("Member not found"))
    }

    pub async fn remove_trip_member(
        &self,
        caller: &User,
        trip_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), TripError> {
        self.require_role(
            caller,
            trip_id,
            MemberRole::can_manage_members,
            "manage members",
        )
        .await?;
        let removed = self
            .backend
            .db
            .delete_member(trip_id, user_id)
            .await
            .map_err(|err| TripError::backend("Failed to remove member", err))?;
        if !removed {
            return Err(TripError::not_found("Member not found"));
        }
        Ok(())
    }

    /// Uploads the receipt first. If the row insert fails afterwards the
    /// receipt stays in storage with nothing referencing it.
    pub async fn add_expense(
        &self,
        caller: &User,
        trip_id: Uuid,
        request: NewExpenseRequest,
        receipt: Option<Upload>,
    ) -> Result<TripExpense, TripError> {
        self.require_role(caller, trip_id, MemberRole::can_edit, "add expenses")
            .await?;
        if !request.amount.is_finite() {
            return Err(TripError::validation("Amount must be a number"));
        }
        let currency = normalize_optional(Some(request.currency))
            .ok_or_else(|| TripError::validation("Currency is required"))?
            .to_uppercase();
        let category = normalize_optional(Some(request.category))
            .ok_or_else(|| TripError::validation("Category is required"))?;

        let (receipt_path, receipt_url) = match receipt {
            Some(upload) => {
                let path = format!(
                    "receipts/{trip_id}/{}-{}",
                    Uuid::new_v4().simple(),
                    upload.sanitized_name()
                );
                self.backend
                    .storage
                    .upload(TRIP_FILES_BUCKET, &path, &upload)
                    .await
                    .map_err(|err| TripError::backend("Failed to upload receipt", err))?;
                let url = self.backend.storage.public_url(TRIP_FILES_BUCKET, &path);
                (Some(path), Some(url))
            }
            None => (None, None),
        };

        let expense = self
            .backend
            .db
            .insert_expense(&NewTripExpense {
                trip_id,
                user_id: caller.id,
                amount: request.amount,
                currency,
                category,
                description: normalize_optional(request.description),
                date: request.date,
                receipt_path: receipt_path.clone(),
                receipt_url,
            })
            .await
            .map_err(|err| {
                if let Some(path) = &receipt_path {
                    warn!(%trip_id, %path, "expense insert failed; receipt left in storage");
                }
                TripError::backend("Failed to add expense", err)
            })?;
        info!(%trip_id, expense_id = %expense.id, "expense added");
        Ok(expense)
    }

    pub async fn remove_expense(
        &self,
        caller: &User,
        trip_id: Uuid,
        expense_id: Uuid,
    ) -> Result<(), TripError> {
        self.require_role(caller, trip_id, MemberRole::can_edit, "remove expenses")
            .await?;
        let expense = self
            .backend
            .db
            .select_expenses(trip_id)
            .await
            .map_err(|err| TripError::backend("Failed to load trip expenses", err))?
            .into_iter()
            .find(|expense| expense.id == expense_id)
            .ok_or_else(|| TripError::not_found("Expense not found"))?;
        self.backend
            .db
            .delete_expense(trip_id, expense_id)
            .await
            .map_err(|err| TripError::backend("Failed to remove expense", err))?;
        if let Some(path) = expense.receipt_path {
            if let Err(err) = self
                .backend
                .storage
                .remove(TRIP_FILES_BUCKET, std::slice::from_ref(&path))
                .await
            {
                warn!(%trip_id, %path, error = %err, "receipt could not be removed");
            }
        }
        Ok(())
    }

    // A failed append leaves the object in storage.
    pub async fn upload_trip_file(
        &self,
        caller: &User,
        trip_id: Uuid,
        upload: Upload,
    ) -> Result<TripFile, TripError> {
        self.require_role(caller, trip_id, MemberRole::can_edit, "upload files")
            .await?;
        let name = upload.sanitized_name();
        let path = format!("trips/{trip_id}/{}-{name}", Uuid::new_v4().simple());
        self.backend
            .storage
            .upload(TRIP_FILES_BUCKET, &path, &upload)
            .await
            .map_err(|err| TripError::backend("Failed to upload file", err))?;
        let file = TripFile {
            name,
            url: self.backend.storage.public_url(TRIP_FILES_BUCKET, &path),
            path,
            uploaded_by: caller.id,
            uploaded_at: Utc::now(),
        };
        self.backend
            .db
            .append_trip_file(trip_id, &file)
            .await
            .map_err(|err| TripError::backend("Failed to attach file", err))?
            .ok_or_else(|| TripError::not_found("Trip not found"))?;
        info!(%trip_id, path = %file.path, "file attached");
        Ok(file)
    }

    pub async fn delete_trip_file(
        &self,
        caller: &User,
        trip_id: Uuid,
        path: &str,
    ) -> Result<(), TripError> {
        let (trip, _) = self
            .require_role(caller, trip_id, MemberRole::can_edit, "delete files")
            .await?;
        if !trip.files.iter().any(|file| file.path == path) {
            return Err(TripError::not_found("File not found"));
        }
        self.backend
            .storage
            .remove(TRIP_FILES_BUCKET, &[path.to_string()])
            .await
            .map_err(|err| TripError::backend("Failed to delete file", err))?;
        self.backend
            .db
            .remove_trip_file(trip_id, path)
            .await
            .map_err(|err| TripError::backend("Failed to detach file", err))?
            .ok_or_else(|| TripError::not_found("Trip not found"))?;
        info!(%trip_id, %path, "file removed");
        Ok(())
    }

    pub fn setup_realtime_subscriptions(&self) -> RealtimeSubscriptions {
        let handles = Table::ALL
            .into_iter()
            .map(|table| {
                let mut receiver = self.backend.realtime.channel(table).subscribe();
                let subscribers = self.subscribers.clone();
                tokio::spawn(async move {
                    loop {
                        match receiver.recv().await {
                            Ok(event) => subscribers.notify(&event),
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(%table, skipped, "realtime listener lagged behind");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    debug!(%table, "realtime channel closed");
                })
            })
            .collect();
        RealtimeSubscriptions { handles }
    }

    pub fn subscribe<F>(&self, table: Table, callback: F) -> SubscriptionToken
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(table, callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers.unsubscribe(token)
    }

    pub fn notify_subscribers(&self, event: &ChangeEvent) {
        self.subscribers.notify(event);
    }

    async fn load_trip(&self, trip_id: Uuid) -> Result<Trip, TripError> {
        self.backend
            .db
            .select_trip(trip_id)
            .await
            .map_err(|err| TripError::backend("Failed to load trip", err))?
            .ok_or_else(|| TripError::not_found("Trip not found"))
    }

    // Access follows membership alone, like the trip list does.
    async fn role_of(&self, trip: &Trip, caller: &User) -> Result<Option<MemberRole>, TripError> {
        let member = self
            .backend
            .db
            .select_member(trip.id, caller.id)
            .await
            .map_err(|err| TripError::backend("Failed to load membership", err))?;
        Ok(member.map(|member| member.role))
    }

    async fn require_role(
        &self,
        caller: &User,
        trip_id: Uuid,
        allowed: fn(&MemberRole) -> bool,
        action: &str,
    ) -> Result<(Trip, MemberRole), TripError> {
        let trip = self.load_trip(trip_id).await?;
        match self.role_of(&trip, caller).await? {
            Some(role) if allowed(&role) => Ok((trip, role)),
            Some(role) => {
                warn!(%trip_id, user_id = %caller.id, %role, action, "permission denied");
                Err(TripError::authorization(format!(
                    "A trip {role} cannot {action}"
                )))
            }
            None => Err(TripError::authorization("You are not a member of this trip")),
        }
    }
}
