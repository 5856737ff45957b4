//! Shell-level pages: sign-in screen, dashboard and the app container.

use askama::Template;

use super::Toast;
use crate::shell::AppId;

#[derive(Template)]
#[template(path = "auth.html")]
pub struct AuthPage {
    pub email: String,
    pub toasts: Vec<Toast>,
}

#[derive(Clone)]
pub struct AppCard {
    pub id: &'static str,
    pub title: &'static str,
    pub blurb: &'static str,
}

impl From<AppId> for AppCard {
    fn from(app: AppId) -> Self {
        Self {
            id: app.as_str(),
            title: app.title(),
            blurb: app.blurb(),
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardPage {
    pub email: String,
    pub apps: Vec<AppCard>,
    pub toasts: Vec<Toast>,
}

impl DashboardPage {
    pub fn new(email: impl Into<String>, toasts: Vec<Toast>) -> Self {
        Self {
            email: email.into(),
            apps: AppId::ALL.into_iter().map(AppCard::from).collect(),
            toasts,
        }
    }
}

#[derive(Template)]
#[template(path = "app_container.html")]
pub struct AppContainerPage {
    pub email: String,
    pub app_id: &'static str,
    pub app_title: &'static str,
    pub app_markup: String,
    pub toasts: Vec<Toast>,
}
