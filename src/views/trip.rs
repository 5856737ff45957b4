//! Markup for the trip organizer: the list of trip cards, the detail panel
//! and the new-trip modal, rendered into fixed element ids.

use askama::Template;
use uuid::Uuid;

use super::{ensure_elements, format_amount, format_date, format_date_range, ViewError};
use crate::models::{
    member::MemberRole,
    trip::{Trip, TripDetails, TripStatus},
};

pub const TRIP_LIST: &str = "tripList";
pub const TRIP_DETAILS: &str = "tripDetails";
pub const NEW_TRIP_BUTTON: &str = "newTripBtn";
pub const NEW_TRIP_MODAL: &str = "newTripModal";
pub const NEW_TRIP_FORM: &str = "newTripForm";
pub const CANCEL_NEW_TRIP: &str = "cancelNewTrip";

pub const REQUIRED_ELEMENTS: [&str; 11] = [
    TRIP_LIST,
    TRIP_DETAILS,
    NEW_TRIP_BUTTON,
    NEW_TRIP_MODAL,
    NEW_TRIP_FORM,
    CANCEL_NEW_TRIP,
    "tripTitle",
    "tripLocation",
    "tripStartDate",
    "tripEndDate",
    "tripDescription",
];

const ASSIGNABLE_ROLES: [MemberRole; 3] =
    [MemberRole::Viewer, MemberRole::Editor, MemberRole::Owner];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModalState {
    Open,
    #[default]
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct TripDraft {
    pub title: String,
    pub location: String,
    pub start_date: String,
    pub end_date: String,
    pub description: String,
    pub budget: String,
    pub currency: String,
}

#[derive(Clone)]
struct TripCard {
    id: String,
    title: String,
    location: String,
    dates: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "trip/list.html")]
struct TripListTemplate {
    cards: Vec<TripCard>,
}

#[derive(Clone)]
struct MemberRow {
    user_id: String,
    email: String,
    role: String,
    role_options: Vec<SelectOption>,
}

#[derive(Clone)]
struct ExpenseRow {
    id: String,
    date: String,
    category: String,
    description: String,
    amount: String,
    has_receipt: bool,
    receipt_url: String,
}

#[derive(Clone)]
struct FileRow {
    name: String,
    url: String,
    path: String,
}

#[derive(Clone)]
struct SelectOption {
    name: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "trip/details.html")]
struct TripDetailsTemplate {
    selected: bool,
    id: String,
    title: String,
    location: String,
    dates: String,
    description: String,
    status: String,
    role: String,
    can_edit: bool,
    can_delete: bool,
    can_manage_members: bool,
    has_budget: bool,
    budget: String,
    total_expenses: String,
    remaining_budget: String,
    members: Vec<MemberRow>,
    expenses: Vec<ExpenseRow>,
    files: Vec<FileRow>,
    edit_title: String,
    edit_location: String,
    edit_start_date: String,
    edit_end_date: String,
    edit_description: String,
    edit_budget: String,
    edit_currency: String,
    statuses: Vec<SelectOption>,
    roles: Vec<String>,
    today: String,
}

#[derive(Template)]
#[template(path = "trip/app.html")]
struct TripAppTemplate<'a> {
    list_html: &'a str,
    details_html: &'a str,
    modal_open: bool,
    draft: &'a TripDraft,
}

/// Renders the trip organizer. Markup handed to the shell has passed
/// [`TripView::mount`], so every fixed container is known to exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripView;

impl TripView {
    pub fn new() -> Self {
        Self
    }

    pub fn mount(&self, markup: &str) -> Result<(), ViewError> {
        ensure_elements(markup, &REQUIRED_ELEMENTS)
    }

    pub fn render_list(&self, trips: &[Trip], selected: Option<Uuid>) -> Result<String, ViewError> {
        let cards = trips
            .iter()
            .map(|trip| TripCard {
                id: trip.id.to_string(),
                title: trip.title.clone(),
                location: trip
                    .location
                    .clone()
                    .unwrap_or_else(|| "No location set".into()),
                dates: format_date_range(trip.start_date, trip.end_date),
                selected: Some(trip.id) == selected,
            })
            .collect();
        Ok(TripListTemplate { cards }.render()?)
    }

    pub fn render_details(&self, details: Option<&TripDetails>) -> Result<String, ViewError> {
        let template = match details {
            Some(details) => details_template(details),
            None => empty_details(),
        };
        Ok(template.render()?)
    }

    pub fn render_app(
        &self,
        list_html: &str,
        details_html: &str,
        modal: ModalState,
        draft: &TripDraft,
    ) -> Result<String, ViewError> {
        let markup = TripAppTemplate {
            list_html,
            details_html,
            modal_open: modal == ModalState::Open,
            draft,
        }
        .render()?;
        self.mount(&markup)?;
        Ok(markup)
    }
}

fn details_template(details: &TripDetails) -> TripDetailsTemplate {
    let trip = &details.trip;
    let currency = trip.currency.as_deref();
    TripDetailsTemplate {
        selected: true,
        id: trip.id.to_string(),
        title: trip.title.clone(),
        location: trip
            .location
            .clone()
            .unwrap_or_else(|| "No location set".into()),
        dates: format_date_range(trip.start_date, trip.end_date),
        description: trip
            .description
            .clone()
            .unwrap_or_else(|| "No description available".into()),
        status: trip.status.to_string(),
        role: details.role.to_string(),
        can_edit: details.role.can_edit(),
        can_delete: details.role.can_delete(),
        can_manage_members: details.role.can_manage_members(),
        has_budget: trip.budget.is_some(),
        budget: trip
            .budget
            .map(|budget| format_amount(budget, currency))
            .unwrap_or_default(),
        total_expenses: format_amount(details.total_expenses, None),
        remaining_budget: details
            .remaining_budget
            .map(|remaining| format_amount(remaining, currency))
            .unwrap_or_default(),
        members: details
            .members
            .iter()
            .map(|member| MemberRow {
                user_id: member.user_id.to_string(),
                email: member.email.clone(),
                role: member.role.to_string(),
                role_options: ASSIGNABLE_ROLES
                    .iter()
                    .map(|role| SelectOption {
                        name: role.to_string(),
                        selected: *role == member.role,
                    })
                    .collect(),
            })
            .collect(),
        expenses: details
            .expenses
            .iter()
            .map(|expense| ExpenseRow {
                id: expense.id.to_string(),
                date: format_date(expense.date),
                category: expense.category.clone(),
                description: expense.description_text().to_string(),
                amount: format_amount(expense.amount, Some(&expense.currency)),
                has_receipt: expense.receipt_url.is_some(),
                receipt_url: expense.receipt_url.clone().unwrap_or_default(),
            })
            .collect(),
        files: trip
            .files
            .iter()
            .map(|file| FileRow {
                name: file.name.clone(),
                url: file.url.clone(),
                path: file.path.clone(),
            })
            .collect(),
        edit_title: trip.title.clone(),
        edit_location: trip.location.clone().unwrap_or_default(),
        edit_start_date: trip.start_date.format("%Y-%m-%d").to_string(),
        edit_end_date: trip.end_date.format("%Y-%m-%d").to_string(),
        edit_description: trip.description.clone().unwrap_or_default(),
        edit_budget: trip.budget.map(|b| b.to_string()).unwrap_or_default(),
        edit_currency: trip.currency.clone().unwrap_or_default(),
        statuses: [
            TripStatus::Planning,
            TripStatus::Active,
            TripStatus::Completed,
            TripStatus::Cancelled,
        ]
        .iter()
        .map(|status| SelectOption {
            name: status.to_string(),
            selected: *status == trip.status,
        })
        .collect(),
        roles: ASSIGNABLE_ROLES
            .iter()
            .map(MemberRole::to_string)
            .collect(),
        today: chrono::Local::now().date_naive().format("%Y-%m-%d").to_string(),
    }
}

fn empty_details() -> TripDetailsTemplate {
    TripDetailsTemplate {
        selected: false,
        id: String::new(),
        title: String::new(),
        location: String::new(),
        dates: String::new(),
        description: String::new(),
        status: String::new(),
        role: String::new(),
        can_edit: false,
        can_delete: false,
        can_manage_members: false,
        has_budget: false,
        budget: String::new(),
        total_expenses: String::new(),
        remaining_budget: String::new(),
        members: Vec::new(),
        expenses: Vec::new(),
        files: Vec::new(),
        edit_title: String::new(),
        edit_location: String::new(),
        edit_start_date: String::new(),
        edit_end_date: String::new(),
        edit_description: String::new(),
        edit_budget: String::new(),
        edit_currency: String::new(),
        statuses: Vec::new(),
        roles: Vec::new(),
        today: String::new(),
    }
}
