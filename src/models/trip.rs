use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::{expense::TripExpense, file::TripFile, member::MemberRole, member::TripMember};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TripStatus {
    #[default]
    Planning,
    Active,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Planning => "planning",
            TripStatus::Active => "active",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" => Ok(TripStatus::Planning),
            "active" => Ok(TripStatus::Active),
            "completed" => Ok(TripStatus::Completed),
            "cancelled" => Ok(TripStatus::Cancelled),
            other => Err(format!("unknown trip status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Trip {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub budget: Option<f64>,
    pub currency: Option<String>,
    pub status: TripStatus,
    #[sqlx(json)]
    pub files: Vec<TripFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTrip {
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub budget: Option<f64>,
    pub currency: Option<String>,
}

/// Partial update of a trip row; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct TripChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// `Some(None)` clears the budget.
    pub budget: Option<Option<f64>>,
    pub currency: Option<String>,
    pub status: Option<TripStatus>,
}

impl TripChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.budget.is_none()
            && self.currency.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct TripDetails {
    pub trip: Trip,
    pub role: MemberRole,
    pub members: Vec<TripMember>,
    pub expenses: Vec<TripExpense>,
    pub total_expenses: f64,
    pub remaining_budget: Option<f64>,
}

/// Sum of all expense amounts, currencies ignored, and what is left of the budget.
pub fn expense_totals(budget: Option<f64>, expenses: &[TripExpense]) -> (f64, Option<f64>) {
    let total: f64 = expenses.iter().map(|expense| expense.amount).sum();
    (total, budget.map(|budget| budget - total))
}
