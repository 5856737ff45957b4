//! Top-level view switching: sign-in screen, app dashboard, mounted app.

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::debug;

use crate::{backend::AuthEvent, models::session::Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppId {
    Trip,
}

impl AppId {
    pub const ALL: [AppId; 1] = [AppId::Trip];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppId::Trip => "trip",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AppId::Trip => "Trip Organizer",
        }
    }

    pub fn blurb(&self) -> &'static str {
        match self {
            AppId::Trip => "Plan and manage your trips",
        }
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellError {
    #[error("App not found")]
    UnknownApp(String),
    #[error("sign in to open apps")]
    SignedOut,
}

impl FromStr for AppId {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppId::ALL
            .into_iter()
            .find(|app| app.as_str() == s)
            .ok_or_else(|| ShellError::UnknownApp(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellView {
    Auth,
    Dashboard,
    App(AppId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    view: ShellView,
}

impl Shell {
    /// Starts on the dashboard when a live session exists, on the sign-in screen otherwise.
    pub fn boot(session: Option<&Session>) -> Self {
        let view = if session.is_some() {
            ShellView::Dashboard
        } else {
            ShellView::Auth
        };
        debug!(?view, "shell booted");
        Self { view }
    }

    pub fn view(&self) -> ShellView {
        self.view
    }

    pub fn location(&self) -> String {
        match self.view {
            ShellView::Auth | ShellView::Dashboard => "/".to_string(),
            ShellView::App(app) => format!("/apps/{app}"),
        }
    }

    pub fn on_auth_event(&mut self, event: &AuthEvent) {
        self.view = match event {
            AuthEvent::SignedIn(_) => ShellView::Dashboard,
            AuthEvent::SignedOut => ShellView::Auth,
        };
        debug!(event = event.name(), view = ?self.view, "auth state changed");
    }

    /// An unknown id leaves the shell on the dashboard.
    pub fn select_app(&mut self, app_id: &str) -> Result<AppId, ShellError> {
        if self.view == ShellView::Auth {
            return Err(ShellError::SignedOut);
        }
        match app_id.parse::<AppId>() {
            Ok(app) => {
                self.view = ShellView::App(app);
                Ok(app)
            }
            Err(err) => {
                self.view = ShellView::Dashboard;
                Err(err)
            }
        }
    }

    pub fn back(&mut self) {
        if matches!(self.view, ShellView::App(_)) {
            self.view = ShellView::Dashboard;
        }
    }
}
