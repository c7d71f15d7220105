//! Хранилище броней.
//!
//! `BookingStore` - единственный источник истины для статусов. Все операции
//! атомарны на уровне одной записи; две операции дополнительно атомарны
//! по смыслу:
//!
//! - `insert_unless_active` - проверка дубля и вставка одним шагом, так что два
//!   параллельных `create` с одним email не создадут две активные брони;
//! - `confirm` - compare-and-set перехода в `confirmed`: выигрывает ровно один
//!   вызов, остальные получают уже сохранённую запись;
//! - `update` - статус текущей записи проверяется в момент записи, поэтому
//!   параллельная отмена не может быть перезаписана.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Booking, BookingFilter, BookingPatch, BookingStatus, NewBooking};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryBookingStore;
pub use postgres::PgBookingStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt booking row: {0}")]
    Corrupt(String),
}

/// Результат вставки с проверкой дубля.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Booking),
    /// Уже есть активная бронь с тем же email - возвращаем её.
    Existing(Booking),
}

impl InsertOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            InsertOutcome::Created(b) | InsertOutcome::Existing(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            InsertOutcome::Created(b) | InsertOutcome::Existing(b) => b,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, InsertOutcome::Created(_))
    }
}

/// Результат попытки подтверждения.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// Этот вызов перевёл бронь в `confirmed`.
    Confirmed(Booking),
    /// Бронь уже была в другом статусе, запись не менялась.
    Unchanged(Booking),
    NotFound,
}

/// Результат частичного обновления.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(Booking),
    /// Текущий статус не допускает такой патч, запись не менялась.
    Rejected(Booking),
    /// У нового email уже есть другая активная бронь.
    Duplicate(Booking),
    NotFound,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError>;

    async fn insert_unless_active(&self, booking: NewBooking) -> Result<InsertOutcome, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn find_most_recent_by_email_with_status(
        &self,
        email: &str,
        statuses: &[BookingStatus],
    ) -> Result<Option<Booking>, StoreError>;

    async fn find_many(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;

    /// Применяет патч, если текущий статус входит в `patch.allowed_from()`:
    /// статус и время меняются только у нетерминальной брони.
    /// Смена email на адрес с другой активной бронью даёт `Duplicate`.
    async fn update(&self, id: Uuid, patch: &BookingPatch) -> Result<UpdateOutcome, StoreError>;

    /// Переводит бронь в `confirmed`, если она в `pending` или `payment_pending`.
    /// Уже записанный `meeting_id` не перезаписывается.
    async fn confirm(
        &self,
        id: Uuid,
        meeting_id: &str,
        payment_id: Option<&str>,
    ) -> Result<ConfirmOutcome, StoreError>;
}
