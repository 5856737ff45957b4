pub mod pages;
pub mod trip;

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("required element #{0} is missing")]
    MissingElement(&'static str),
    #[error(transparent)]
    Render(#[from] askama::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub const TIMEOUT_MS: u64 = 5_000;

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Info,
            message: message.into(),
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self.kind {
            ToastKind::Error => "error-message",
            ToastKind::Info => "info-message",
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        Self::TIMEOUT_MS
    }
}

/// Fails on the first id in `ids` with no element in `markup`.
pub fn ensure_elements(markup: &str, ids: &[&'static str]) -> Result<(), ViewError> {
    match ids
        .iter()
        .find(|id| !markup.contains(&format!("id=\"{id}\"")))
    {
        Some(missing) => Err(ViewError::MissingElement(*missing)),
        None => Ok(()),
    }
}

/// `M/D/YYYY`, the way the trip cards show dates.
pub fn format_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}

pub fn format_date_range(start: NaiveDate, end: NaiveDate) -> String {
    format!("{} - {}", format_date(start), format_date(end))
}

pub fn format_amount(amount: f64, currency: Option<&str>) -> String {
    match currency {
        Some(currency) => format!("{amount:.2} {currency}"),
        None => format!("{amount:.2}"),
    }
}
