use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TripExpense {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub category: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub receipt_path: Option<String>,
    pub receipt_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TripExpense {
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct NewTripExpense {
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub category: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub receipt_path: Option<String>,
    pub receipt_url: Option<String>,
}
