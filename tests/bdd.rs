#![allow(dead_code)]

mod support;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use cucumber::{given, then, when, World as _};
use support::TestApp;
use trip_organizer::{
    backend::{ChangeEvent, Table},
    error::TripError,
    models::{
        expense::TripExpense,
        file::{TripFile, Upload},
        member::MemberRole,
        session::Session,
        trip::{Trip, TripChanges},
    },
    services::trips::{NewExpenseRequest, NewTripRequest},
    views::trip::TripView,
};

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    app: Option<TestApp>,
    sessions: HashMap<String, Session>,
    trip: Option<Trip>,
    last_error: Option<TripError>,
    calls_before: usize,
    heard: Arc<Mutex<Vec<ChangeEvent>>>,
    files: Vec<TripFile>,
    expenses: Vec<TripExpense>,
}

impl AppWorld {
    fn app(&self) -> &TestApp {
        self.app.as_ref().expect("app must be initialised first")
    }

    fn session(&self, email: &str) -> &Session {
        self.sessions
            .get(email)
            .unwrap_or_else(|| panic!("{email} has not signed in"))
    }

    fn trip(&self) -> &Trip {
        self.trip.as_ref().expect("a trip must exist")
    }

    fn user_id(&self, email: &str) -> uuid::Uuid {
        self.session(email).user.id
    }

    fn record<T>(&mut self, outcome: Result<T, TripError>) -> Option<T> {
        match outcome {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(err) => {
                self.last_error = Some(err);
                None
            }
        }
    }

    async fn stored_trip(&self) -> Trip {
        self.app()
            .state
            .backend
            .db
            .select_trip(self.trip().id)
            .await
            .expect("load trip")
            .expect("trip still exists")
    }

    async fn update_trip(&mut self, email: &str, changes: TripChanges) {
        let user = self.session(email).user.clone();
        let outcome = self
            .app()
            .state
            .trips
            .update_trip(&user, self.trip().id, changes)
            .await;
        if let Some(trip) = self.record(outcome) {
            self.trip = Some(trip);
        }
    }

    async fn create_trip(&mut self, email: &str, title: &str, start: &str, end: &str) {
        let user = self.session(email).user.clone();
        let request = NewTripRequest {
            title: title.into(),
            start_date: start.into(),
            end_date: end.into(),
            ..NewTripRequest::default()
        };
        self.calls_before = self.app().db.calls();
        match self.app().state.trips.create_trip(&user, request).await {
            Ok(trip) => self.trip = Some(trip),
            Err(err) => self.last_error = Some(err),
        }
    }

    async fn add_expense(
        &mut self,
        email: &str,
        amount: f64,
        currency: &str,
        receipt: Option<Upload>,
    ) {
        let user = self.session(email).user.clone();
        let trip_id = self.trip().id;
        let request = NewExpenseRequest {
            amount,
            currency: currency.into(),
            category: "food".into(),
            description: None,
            date: self.trip().start_date,
        };
        let outcome = self
            .app()
            .state
            .trips
            .add_expense(&user, trip_id, request, receipt)
            .await;
        if let Some(expense) = self.record(outcome) {
            self.expenses.push(expense);
        }
    }
}

#[given("a fresh trip organizer")]
async fn given_fresh_app(world: &mut AppWorld) {
    world.app = Some(TestApp::new().await.expect("test app"));
    world.sessions.clear();
    world.trip = None;
    world.last_error = None;
    world.files.clear();
    world.expenses.clear();
}

#[given(regex = r#"^"([^"]+)" has signed in with a magic link$"#)]
async fn given_signed_in(world: &mut AppWorld, email: String) {
    let session = world.app().sign_in(&email).await.expect("sign in");
    assert_eq!(session.user.email, email);
    world.sessions.insert(email, session);
}

#[given(regex = r#"^"([^"]+)" created the trip "([^"]*)" from "([^"]+)" to "([^"]+)"$"#)]
async fn given_trip(
    world: &mut AppWorld,
    email: String,
    title: String,
    start: String,
    end: String,
) {
    world.create_trip(&email, &title, &start, &end).await;
    assert!(world.trip.is_some(), "trip creation failed: {:?}", world.last_error);
}

#[when(regex = r#"^"([^"]+)" creates the trip "([^"]*)" from "([^"]+)" to "([^"]+)"$"#)]
async fn when_create_trip(
    world: &mut AppWorld,
    email: String,
    title: String,
    start: String,
    end: String,
) {
    world.create_trip(&email, &title, &start, &end).await;
}

#[given(regex = r"^the trip has a budget of (\d+(?:\.\d+)?)$")]
async fn given_budget(world: &mut AppWorld, budget: f64) {
    let owner = world.trip().user_id;
    let user = world
        .sessions
        .values()
        .find(|session| session.user.id == owner)
        .map(|session| session.user.clone())
        .expect("trip owner signed in");
    let trip = world
        .app()
        .state
        .trips
        .update_trip(
            &user,
            world.trip().id,
            TripChanges {
                budget: Some(Some(budget)),
                ..Default::default()
            },
        )
        .await
        .expect("set budget");
    world.trip = Some(trip);
}

#[given(regex = r#"^"([^"]+)" added "([^"]+)" as (owner|editor|viewer)$"#)]
async fn given_member(world: &mut AppWorld, owner: String, email: String, role: String) {
    let user = world.session(&owner).user.clone();
    let role: MemberRole = role.parse().expect("role");
    world
        .app()
        .state
        .trips
        .add_trip_member(&user, world.trip().id, &email, role)
        .await
        .expect("add member");
}

#[given(regex = r#"^a subscriber listening on "(trips|trip_members|trip_expenses)"$"#)]
async fn given_subscriber(world: &mut AppWorld, table: String) {
    let table = Table::ALL
        .into_iter()
        .find(|candidate| candidate.as_str() == table)
        .expect("known table");
    let heard = world.heard.clone();
    world.app().state.trips.subscribe(table, move |event| {
        heard.lock().expect("heard").push(event.clone());
    });
}

#[given("expense inserts fail")]
async fn given_expense_inserts_fail(world: &mut AppWorld) {
    world.app().db.fail_expense_inserts();
}

#[when(regex = r#"^"([^"]+)" deletes the trip$"#)]
async fn when_delete_trip(world: &mut AppWorld, email: String) {
    let user = world.session(&email).user.clone();
    world.last_error = None;
    if let Err(err) = world
        .app()
        .state
        .trips
        .delete_trip(&user, world.trip().id)
        .await
    {
        world.last_error = Some(err);
    }
}

#[when(regex = r#"^"([^"]+)" adds an expense of (\d+(?:\.\d+)?) "([A-Z]{3})"$"#)]
async fn when_add_expense(world: &mut AppWorld, email: String, amount: f64, currency: String) {
    world.add_expense(&email, amount, &currency, None).await;
}

#[when(regex = r#"^"([^"]+)" adds an expense of (\d+(?:\.\d+)?) "([A-Z]{3})" with receipt "([^"]+)"$"#)]
async fn when_add_expense_with_receipt(
    world: &mut AppWorld,
    email: String,
    amount: f64,
    currency: String,
    file_name: String,
) {
    let receipt = Upload {
        file_name,
        content_type: Some("image/jpeg".into()),
        bytes: vec![0xff, 0xd8, 0xff],
    };
    world
        .add_expense(&email, amount, &currency, Some(receipt))
        .await;
}

#[when(regex = r#"^"([^"]+)" signs out$"#)]
async fn when_sign_out(world: &mut AppWorld, email: String) {
    let token = world.session(&email).access_token.clone();
    world
        .app()
        .state
        .backend
        .auth
        .sign_out(&token)
        .await
        .expect("sign out");
}

#[when(regex = r#"^"([^"]+)" changes the role of "([^"]+)" to (owner|editor|viewer)$"#)]
async fn when_change_role(world: &mut AppWorld, owner: String, email: String, role: String) {
    let user = world.session(&owner).user.clone();
    let member_id = world.user_id(&email);
    let role: MemberRole = role.parse().expect("role");
    let outcome = world
        .app()
        .state
        .trips
        .update_member_role(&user, world.trip().id, member_id, role)
        .await;
    world.record(outcome);
}

#[when(regex = r#"^"([^"]+)" removes "([^"]+)" from the trip$"#)]
async fn when_remove_member(world: &mut AppWorld, owner: String, email: String) {
    let user = world.session(&owner).user.clone();
    let member_id = world.user_id(&email);
    let outcome = world
        .app()
        .state
        .trips
        .remove_trip_member(&user, world.trip().id, member_id)
        .await;
    world.record(outcome);
}

#[when(regex = r#"^"([^"]+)" opens the trip$"#)]
async fn when_open_trip(world: &mut AppWorld, email: String) {
    let user = world.session(&email).user.clone();
    let outcome = world
        .app()
        .state
        .trips
        .get_trip_details(&user, world.trip().id)
        .await;
    world.record(outcome);
}

#[when(regex = r#"^"([^"]+)" renames the trip to "([^"]*)"$"#)]
async fn when_rename_trip(world: &mut AppWorld, email: String, title: String) {
    world
        .update_trip(
            &email,
            TripChanges {
                title: Some(title),
                ..Default::default()
            },
        )
        .await;
}

#[when(regex = r#"^"([^"]+)" clears the budget$"#)]
async fn when_clear_budget(world: &mut AppWorld, email: String) {
    world
        .update_trip(
            &email,
            TripChanges {
                budget: Some(None),
                ..Default::default()
            },
        )
        .await;
}

#[when(regex = r#"^"([^"]+)" removes the last expense$"#)]
async fn when_remove_expense(world: &mut AppWorld, email: String) {
    let user = world.session(&email).user.clone();
    let expense = world.expenses.pop().expect("an expense was added");
    let outcome = world
        .app()
        .state
        .trips
        .remove_expense(&user, world.trip().id, expense.id)
        .await;
    world.record(outcome);
}

#[when(regex = r#"^"([^"]+)" uploads the file "([^"]+)"$"#)]
async fn when_upload_file(world: &mut AppWorld, email: String, file_name: String) {
    let user = world.session(&email).user.clone();
    let upload = Upload {
        bytes: file_name.as_bytes().to_vec(),
        file_name,
        content_type: Some("text/plain".into()),
    };
    let outcome = world
        .app()
        .state
        .trips
        .upload_trip_file(&user, world.trip().id, upload)
        .await;
    if let Some(file) = world.record(outcome) {
        world.files.push(file);
    }
}

#[when(regex = r#"^"([^"]+)" deletes the file "([^"]+)"$"#)]
async fn when_delete_file(world: &mut AppWorld, email: String, file_name: String) {
    let user = world.session(&email).user.clone();
    let path = world
        .files
        .iter()
        .find(|file| file.name == file_name)
        .map(|file| file.path.clone())
        .expect("file was uploaded");
    let outcome = world
        .app()
        .state
        .trips
        .delete_trip_file(&user, world.trip().id, &path)
        .await;
    world.record(outcome);
}

#[then(regex = r#"^the trip list of "([^"]+)" shows (\d+) cards?$"#)]
async fn then_card_count(world: &mut AppWorld, email: String, expected: usize) {
    let html = trip_list(world, &email).await;
    assert_eq!(html.matches("class=\"trip-card").count(), expected);
}

#[then(regex = r#"^the trip list of "([^"]+)" shows "([^"]+)"$"#)]
async fn then_list_shows(world: &mut AppWorld, email: String, text: String) {
    let html = trip_list(world, &email).await;
    assert!(html.contains(&text), "{text} missing from {html}");
}

#[then(regex = r#"^"([^"]+)" is the (owner|editor|viewer) of the trip$"#)]
async fn then_role(world: &mut AppWorld, email: String, role: String) {
    let user = world.session(&email).user.clone();
    let details = world
        .app()
        .state
        .trips
        .get_trip_details(&user, world.trip().id)
        .await
        .expect("trip details");
    assert_eq!(details.role.as_str(), role);
}

#[then(regex = r"^the request is rejected as an? (validation|authorization|persistence|not_found) error$")]
async fn then_rejected(world: &mut AppWorld, kind: String) {
    let err = world.last_error.take().expect("an error was expected");
    assert_eq!(err.kind(), kind, "unexpected error: {err}");
}

#[then("no backend call was issued")]
async fn then_no_backend_call(world: &mut AppWorld) {
    assert_eq!(world.app().db.calls(), world.calls_before);
}

#[then(regex = r"^the trip total is (\d+(?:\.\d+)?) with (\d+(?:\.\d+)?) left of the budget$")]
async fn then_totals(world: &mut AppWorld, total: f64, remaining: f64) {
    let owner = world.trip().user_id;
    let user = world
        .sessions
        .values()
        .find(|session| session.user.id == owner)
        .map(|session| session.user.clone())
        .expect("trip owner signed in");
    let details = world
        .app()
        .state
        .trips
        .get_trip_details(&user, world.trip().id)
        .await
        .expect("trip details");
    assert_eq!(details.expenses.len(), 2);
    assert!((details.total_expenses - total).abs() < f64::EPSILON);
    let left = details.remaining_budget.expect("budget set");
    assert!((left - remaining).abs() < f64::EPSILON);
}

#[then(regex = r#"^the receipt "([^"]+)" is left in storage$"#)]
async fn then_receipt_left(world: &mut AppWorld, file_name: String) {
    let found = world
        .app()
        .stored_objects_ending_with(&format!("-{file_name}"));
    assert_eq!(found.len(), 1, "expected exactly one orphaned receipt");
}

#[then(regex = r"^the subscriber hears (\d+) changes?$")]
async fn then_subscriber_hears(world: &mut AppWorld, expected: usize) {
    for _ in 0..50 {
        if world.heard.lock().expect("heard").len() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(world.heard.lock().expect("heard").len(), expected);
}

#[then(regex = r#"^the session of "([^"]+)" is no longer valid$"#)]
async fn then_session_invalid(world: &mut AppWorld, email: String) {
    let token = world.session(&email).access_token.clone();
    let session = world
        .app()
        .state
        .backend
        .auth
        .get_session(&token)
        .await
        .expect("session lookup");
    assert!(session.is_none());
}

#[then("the request succeeds")]
async fn then_succeeds(world: &mut AppWorld) {
    if let Some(err) = world.last_error.take() {
        panic!("unexpected error: {err}");
    }
}

#[then(regex = r"^the backend deleted (\d+) trips?$")]
async fn then_trip_deletions(world: &mut AppWorld, expected: usize) {
    assert_eq!(world.app().db.delete_trip_calls(), expected);
}

#[then(regex = r#"^the trip is called "([^"]+)"$"#)]
async fn then_trip_title(world: &mut AppWorld, title: String) {
    assert_eq!(world.stored_trip().await.title, title);
}

#[then(regex = r#"^the trip files are "([^"]*)"$"#)]
async fn then_trip_files(world: &mut AppWorld, names: String) {
    let stored: Vec<String> = world
        .stored_trip()
        .await
        .files
        .into_iter()
        .map(|file| file.name)
        .collect();
    assert_eq!(stored.join(", "), names);
}

#[then(regex = r#"^(\d+) stored objects? end with "([^"]+)"$"#)]
async fn then_stored_objects(world: &mut AppWorld, expected: usize, file_name: String) {
    let found = world
        .app()
        .stored_objects_ending_with(&format!("-{file_name}"));
    assert_eq!(found.len(), expected);
}

#[then(regex = r"^the trip has (\d+) members?$")]
async fn then_member_count(world: &mut AppWorld, expected: usize) {
    let members = world
        .app()
        .state
        .backend
        .db
        .select_members(world.trip().id)
        .await
        .expect("load members");
    assert_eq!(members.len(), expected);
}

#[then(regex = r"^the trip has (\d+) expenses?$")]
async fn then_expense_count(world: &mut AppWorld, expected: usize) {
    let expenses = world
        .app()
        .state
        .backend
        .db
        .select_expenses(world.trip().id)
        .await
        .expect("load expenses");
    assert_eq!(expenses.len(), expected);
}

#[then(regex = r#"^"([^"]+)" sees no remaining budget$"#)]
async fn then_no_remaining_budget(world: &mut AppWorld, email: String) {
    let user = world.session(&email).user.clone();
    let details = world
        .app()
        .state
        .trips
        .get_trip_details(&user, world.trip().id)
        .await
        .expect("trip details");
    assert_eq!(details.trip.budget, None);
    assert_eq!(details.remaining_budget, None);
}

async fn trip_list(world: &AppWorld, email: &str) -> String {
    let user_id = world.session(email).user.id;
    let trips = world
        .app()
        .state
        .trips
        .get_trips_by_user(user_id)
        .await
        .expect("load trips");
    TripView::new().render_list(&trips, None).expect("render list")
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
