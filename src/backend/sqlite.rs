use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{BackendError, ChangeEvent, ChangeOp, Database, Realtime, Table};
use crate::{
    db::DbPool,
    models::{
        expense::{NewTripExpense, TripExpense},
        file::TripFile,
        member::{MemberRole, NewTripMember, TripMember},
        trip::{NewTrip, Trip, TripChanges},
    },
};

/// Table access backed by SQLite. Every successful mutation is published on
/// the matching realtime channel.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: DbPool,
    realtime: Realtime,
}

impl SqliteDatabase {
    pub fn new(pool: DbPool, realtime: Realtime) -> Self {
        Self { pool, realtime }
    }

    fn publish(&self, table: Table, op: ChangeOp, record_id: Uuid, trip_id: Uuid) {
        self.realtime.publish(ChangeEvent {
            table,
            op,
            record_id,
            trip_id,
        });
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn select_trips_for_member(&self, user_id: Uuid) -> Result<Vec<Trip>, BackendError> {
        let trips = sqlx::query_as::<_, Trip>(
            r#"SELECT t.* FROM trips t
               JOIN trip_members m ON m.trip_id = t.id
               WHERE m.user_id = ?1
               ORDER BY t.start_date ASC, t.created_at ASC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(trips)
    }

    async fn select_trip(&self, id: Uuid) -> Result<Option<Trip>, BackendError> {
        let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(trip)
    }

    async fn insert_trip(&self, trip: &NewTrip) -> Result<Trip, BackendError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, Trip>(
            r#"INSERT INTO trips
               (id, user_id, title, description, location, start_date, end_date,
                budget, currency, status, files, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'planning', '[]', ?10, ?10)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(trip.user_id)
        .bind(&trip.title)
        .bind(&trip.description)
        .bind(&trip.location)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .bind(trip.budget)
        .bind(&trip.currency)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        self.publish(Table::Trips, ChangeOp::Insert, row.id, row.id);
        Ok(row)
    }

    async fn update_trip(
        &self,
        id: Uuid,
        changes: &TripChanges,
    ) -> Result<Option<Trip>, BackendError> {
        // Optional text columns: NULL keeps the value, an empty string clears it.
        let row = sqlx::query_as::<_, Trip>(
            r#"UPDATE trips SET
                 title = COALESCE(?1, title),
                 description = CASE WHEN ?2 IS NULL THEN description ELSE NULLIF(?2, '') END,
                 location = CASE WHEN ?3 IS NULL THEN location ELSE NULLIF(?3, '') END,
                 start_date = COALESCE(?4, start_date),
                 end_date = COALESCE(?5, end_date),
                 budget = CASE WHEN ?6 THEN ?11 ELSE budget END,
                 currency = CASE WHEN ?7 IS NULL THEN currency ELSE NULLIF(?7, '') END,
                 status = COALESCE(?8, status),
                 updated_at = ?9
               WHERE id = ?10
               RETURNING *"#,
        )
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(&changes.location)
        .bind(changes.start_date)
        .bind(changes.end_date)
        .bind(changes.budget.is_some())
        .bind(&changes.currency)
        .bind(changes.status)
        .bind(Utc::now())
        .bind(id)
        .bind(changes.budget.flatten())
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            self.publish(Table::Trips, ChangeOp::Update, id, id);
        }
        Ok(row)
    }

    async fn delete_trip(&self, id: Uuid) -> Result<bool, BackendError> {
        let result = sqlx::query("DELETE FROM trips WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            self.publish(Table::Trips, ChangeOp::Delete, id, id);
        }
        Ok(deleted)
    }

    async fn append_trip_file(
        &self,
        id: Uuid,
        file: &TripFile,
    ) -> Result<Option<Trip>, BackendError> {
        let entry = serde_json::to_string(file)?;
        let row = sqlx::query_as::<_, Trip>(
            r#"UPDATE trips
               SET files = json_insert(files, '$[#]', json(?1)), updated_at = ?2
               WHERE id = ?3
               RETURNING *"#,
        )
        .bind(entry)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            self.publish(Table::Trips, ChangeOp::Update, id, id);
        }
        Ok(row)
    }

    async fn remove_trip_file(&self, id: Uuid, path: &str) -> Result<Option<Trip>, BackendError> {
        let row = sqlx::query_as::<_, Trip>(
            r#"UPDATE trips
               SET files = (
                     SELECT json_group_array(json(value))
                     FROM json_each(trips.files)
                     WHERE json_extract(value, '$.path') <> ?1
                   ),
                   updated_at = ?2
               WHERE id = ?3
               RETURNING *"#,
        )
        .bind(path)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            self.publish(Table::Trips, ChangeOp::Update, id, id);
        }
        Ok(row)
    }

    async fn select_members(&self, trip_id: Uuid) -> Result<Vec<TripMember>, BackendError> {
        let members = sqlx::query_as::<_, TripMember>(
            "SELECT * FROM trip_members WHERE trip_id = ?1 ORDER BY created_at ASC",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn select_member(
        &self,
        trip_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TripMember>, BackendError> {
        let member = sqlx::query_as::<_, TripMember>(
            "SELECT * FROM trip_members WHERE trip_id = ?1 AND user_id = ?2",
        )
        .bind(trip_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(member)
    }

    async fn insert_member(&self, member: &NewTripMember) -> Result<TripMember, BackendError> {
        let row = sqlx::query_as::<_, TripMember>(
            r#"INSERT INTO trip_members (trip_id, user_id, email, role, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               RETURNING *"#,
        )
        .bind(member.trip_id)
        .bind(member.user_id)
        .bind(&member.email)
        .bind(member.role)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        self.publish(Table::TripMembers, ChangeOp::Insert, row.user_id, row.trip_id);
        Ok(row)
    }

    async fn update_member_role(
        &self,
        trip_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<Option<TripMember>, BackendError> {
        let row = sqlx::query_as::<_, TripMember>(
            r#"UPDATE trip_members SET role = ?1
               WHERE trip_id = ?2 AND user_id = ?3
               RETURNING *"#,
        )
        .bind(role)
        .bind(trip_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            self.publish(Table::TripMembers, ChangeOp::Update, user_id, trip_id);
        }
        Ok(row)
    }

    async fn delete_member(&self, trip_id: Uuid, user_id: Uuid) -> Result<bool, BackendError> {
        let result = sqlx::query("DELETE FROM trip_members WHERE trip_id = ?1 AND user_id = ?2")
            .bind(trip_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            self.publish(Table::TripMembers, ChangeOp::Delete, user_id, trip_id);
        }
        Ok(deleted)
    }

    async fn select_expenses(&self, trip_id: Uuid) -> Result<Vec<TripExpense>, BackendError> {
        let expenses = sqlx::query_as::<_, TripExpense>(
            "SELECT * FROM trip_expenses WHERE trip_id = ?1 ORDER BY date ASC, created_at ASC",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(expenses)
    }

    async fn insert_expense(&self, expense: &NewTripExpense) -> Result<TripExpense, BackendError> {
        let row = sqlx::query_as::<_, TripExpense>(
            r#"INSERT INTO trip_expenses
               (id, trip_id, user_id, amount, currency, category, description, date,
                receipt_path, receipt_url, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(expense.trip_id)
        .bind(expense.user_id)
        .bind(expense.amount)
        .bind(&expense.currency)
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(expense.date)
        .bind(&expense.receipt_path)
        .bind(&expense.receipt_url)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        self.publish(Table::TripExpenses, ChangeOp::Insert, row.id, row.trip_id);
        Ok(row)
    }

    async fn delete_expense(&self, trip_id: Uuid, id: Uuid) -> Result<bool, BackendError> {
        let result = sqlx::query("DELETE FROM trip_expenses WHERE id = ?1 AND trip_id = ?2")
            .bind(id)
            .bind(trip_id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            self.publish(Table::TripExpenses, ChangeOp::Delete, id, trip_id);
        }
        Ok(deleted)
    }
}
