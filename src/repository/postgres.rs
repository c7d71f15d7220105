use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::{BookingStore, ConfirmOutcome, InsertOutcome, StoreError, UpdateOutcome};
use crate::models::{Booking, BookingFilter, BookingPatch, BookingStatus, NewBooking, SortOrder};

const COLUMNS: &str = "id, requester_name, requester_email, scheduled_at, reason, status, \
     requester_user_id, meeting_id, order_id, payment_id, amount, currency, created_at, updated_at";

// Строка из БД; статус хранится текстом
#[derive(Debug, FromRow)]
struct BookingRow {
    id: Uuid,
    requester_name: String,
    requester_email: String,
    scheduled_at: DateTime<Utc>,
    reason: String,
    status: String,
    requester_user_id: Option<Uuid>,
    meeting_id: Option<String>,
    order_id: Option<String>,
    payment_id: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|e| StoreError::Corrupt(format!("booking {}: {}", row.id, e)))?;

        Ok(Booking {
            id: row.id,
            requester_name: row.requester_name,
            requester_email: row.requester_email,
            scheduled_at: row.scheduled_at,
            reason: row.reason,
            status,
            requester_user_id: row.requester_user_id,
            meeting_id: row.meeting_id,
            order_id: row.order_id,
            payment_id: row.payment_id,
            amount: row.amount,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_names(statuses: &[BookingStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn convert(row: Option<BookingRow>) -> Result<Option<Booking>, StoreError> {
    row.map(Booking::try_from).transpose()
}

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_with<'e, E>(executor: E, booking: &NewBooking) -> Result<Booking, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row: BookingRow = sqlx::query_as(&format!(
            "INSERT INTO bookings (id, requester_name, requester_email, scheduled_at, reason, status,
                                   requester_user_id, order_id, amount, currency, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
             RETURNING {}",
            COLUMNS
        ))
        .bind(booking.id)
        .bind(&booking.requester_name)
        .bind(&booking.requester_email)
        .bind(booking.scheduled_at)
        .bind(&booking.reason)
        .bind(booking.status.as_str())
        .bind(booking.requester_user_id)
        .bind(&booking.order_id)
        .bind(booking.amount)
        .bind(&booking.currency)
        .fetch_one(executor)
        .await?;

        row.try_into()
    }

    async fn most_recent_with<'e, E>(
        executor: E,
        email: &str,
        statuses: &[BookingStatus],
        exclude: Option<Uuid>,
    ) -> Result<Option<Booking>, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings
             WHERE lower(requester_email) = lower($1) AND status = ANY($2)
               AND ($3::uuid IS NULL OR id <> $3)
             ORDER BY created_at DESC
             LIMIT 1",
            COLUMNS
        ))
        .bind(email)
        .bind(status_names(statuses))
        .bind(exclude)
        .fetch_optional(executor)
        .await?;

        convert(row)
    }

    async fn lock_email<'e, E>(executor: E, email: &str) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        // Сериализуем изменения активных броней одного email до конца транзакции
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext(lower($1))::bigint)")
            .bind(email)
            .execute(executor)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        Self::insert_with(&self.pool, &booking).await
    }

    async fn insert_unless_active(&self, booking: NewBooking) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_email(&mut *tx, &booking.requester_email).await?;

        if let Some(existing) =
            Self::most_recent_with(&mut *tx, &booking.requester_email, &BookingStatus::ACTIVE, None).await?
        {
            tx.rollback().await?;
            debug!("Active booking {} already exists for requester", existing.id);
            return Ok(InsertOutcome::Existing(existing));
        }

        let created = Self::insert_with(&mut *tx, &booking).await?;
        tx.commit().await?;
        Ok(InsertOutcome::Created(created))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        convert(row)
    }

    async fn find_most_recent_by_email_with_status(
        &self,
        email: &str,
        statuses: &[BookingStatus],
    ) -> Result<Option<Booking>, StoreError> {
        Self::most_recent_with(&self.pool, email, statuses, None).await
    }

    async fn find_many(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let mut q = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM bookings WHERE TRUE", COLUMNS));

        if !filter.statuses.is_empty() {
            q.push(" AND status = ANY(").push_bind(status_names(&filter.statuses)).push(")");
        }
        if let Some(from) = filter.from {
            q.push(" AND scheduled_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            q.push(" AND scheduled_at <= ").push_bind(to);
        }
        if let Some(user_id) = filter.requester_user_id {
            q.push(" AND requester_user_id = ").push_bind(user_id);
        }
        if let Some(ref email) = filter.requester_email {
            q.push(" AND lower(requester_email) = lower(").push_bind(email.clone()).push(")");
        }

        q.push(match filter.sort {
            SortOrder::Asc => " ORDER BY scheduled_at ASC, created_at ASC",
            SortOrder::Desc => " ORDER BY scheduled_at DESC, created_at DESC",
        });

        if let Some(limit) = filter.limit {
            q.push(" LIMIT ").push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            q.push(" OFFSET ").push_bind(offset);
        }

        let rows: Vec<BookingRow> = q.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn update(&self, id: Uuid, patch: &BookingPatch) -> Result<UpdateOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Держим строку до коммита, чтобы статус не сменился между проверкой и записью
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1 FOR UPDATE", COLUMNS))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = convert(row)? else {
            return Ok(UpdateOutcome::NotFound);
        };

        if !patch.allowed_from().contains(&current.status) {
            tx.rollback().await?;
            return Ok(UpdateOutcome::Rejected(current));
        }
        if patch.is_empty() {
            tx.rollback().await?;
            return Ok(UpdateOutcome::Updated(current));
        }

        let status = patch.status.unwrap_or(current.status);
        let email = patch.requester_email.as_deref().unwrap_or(&current.requester_email);
        let email_changed = !email.eq_ignore_ascii_case(&current.requester_email);
        if status.is_active() && (email_changed || !current.status.is_active()) {
            Self::lock_email(&mut *tx, email).await?;
            if let Some(other) =
                Self::most_recent_with(&mut *tx, email, &BookingStatus::ACTIVE, Some(id)).await?
            {
                tx.rollback().await?;
                debug!("Booking {} would duplicate active booking {}", id, other.id);
                return Ok(UpdateOutcome::Duplicate(other));
            }
        }

        let mut q = QueryBuilder::<Postgres>::new("UPDATE bookings SET updated_at = NOW()");

        if let Some(ref name) = patch.requester_name {
            q.push(", requester_name = ").push_bind(name.clone());
        }
        if let Some(ref email) = patch.requester_email {
            q.push(", requester_email = ").push_bind(email.clone());
        }
        if let Some(when) = patch.scheduled_at {
            q.push(", scheduled_at = ").push_bind(when);
        }
        if let Some(ref reason) = patch.reason {
            q.push(", reason = ").push_bind(reason.clone());
        }
        if let Some(status) = patch.status {
            q.push(", status = ").push_bind(status.as_str());
        }

        q.push(" WHERE id = ").push_bind(id);
        q.push(format!(" RETURNING {}", COLUMNS));

        let row: BookingRow = q.build_query_as().fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(UpdateOutcome::Updated(row.try_into()?))
    }

    async fn confirm(
        &self,
        id: Uuid,
        meeting_id: &str,
        payment_id: Option<&str>,
    ) -> Result<ConfirmOutcome, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "UPDATE bookings
             SET status = 'confirmed',
                 meeting_id = COALESCE(meeting_id, $2),
                 payment_id = COALESCE($3, payment_id),
                 updated_at = NOW()
             WHERE id = $1 AND status IN ('pending', 'payment_pending')
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(meeting_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(ConfirmOutcome::Confirmed(row.try_into()?));
        }

        // Проиграли гонку или статус не подходит - отдаём то, что лежит в БД
        Ok(match self.find_by_id(id).await? {
            Some(current) => ConfirmOutcome::Unchanged(current),
            None => ConfirmOutcome::NotFound,
        })
    }
}
