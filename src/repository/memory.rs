use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BookingStore, ConfirmOutcome, InsertOutcome, StoreError, UpdateOutcome};
use crate::models::{Booking, BookingFilter, BookingPatch, BookingStatus, NewBooking, SortOrder};

/// Хранилище в памяти для тестов и локального запуска.
/// Записи лежат в порядке вставки, поэтому "самая свежая" - последняя.
#[derive(Clone, Default)]
pub struct InMemoryBookingStore {
    bookings: Arc<Mutex<Vec<Booking>>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.bookings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bookings.lock().await.is_empty()
    }
}

fn materialize(booking: NewBooking) -> Booking {
    let now = Utc::now();
    Booking {
        id: booking.id,
        requester_name: booking.requester_name,
        requester_email: booking.requester_email,
        scheduled_at: booking.scheduled_at,
        reason: booking.reason,
        status: booking.status,
        requester_user_id: booking.requester_user_id,
        meeting_id: None,
        order_id: booking.order_id,
        payment_id: None,
        amount: booking.amount,
        currency: booking.currency,
        created_at: now,
        updated_at: now,
    }
}

fn most_recent<'a>(
    bookings: &'a [Booking],
    email: &str,
    statuses: &[BookingStatus],
) -> Option<&'a Booking> {
    bookings
        .iter()
        .rev()
        .find(|b| b.requester_email.eq_ignore_ascii_case(email) && statuses.contains(&b.status))
}

/// Другая активная бронь, с которой столкнётся `current` после патча.
fn active_conflict<'a>(
    bookings: &'a [Booking],
    current: &Booking,
    patch: &BookingPatch,
) -> Option<&'a Booking> {
    let status = patch.status.unwrap_or(current.status);
    let email = patch.requester_email.as_deref().unwrap_or(&current.requester_email);
    let email_changed = !email.eq_ignore_ascii_case(&current.requester_email);

    if !status.is_active() || (!email_changed && current.status.is_active()) {
        return None;
    }
    bookings
        .iter()
        .rev()
        .find(|b| b.id != current.id && b.requester_email.eq_ignore_ascii_case(email) && b.status.is_active())
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        let booking = materialize(booking);
        self.bookings.lock().await.push(booking.clone());
        Ok(booking)
    }

    async fn insert_unless_active(&self, booking: NewBooking) -> Result<InsertOutcome, StoreError> {
        let mut bookings = self.bookings.lock().await;
        if let Some(existing) = most_recent(&bookings, &booking.requester_email, &BookingStatus::ACTIVE) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        let booking = materialize(booking);
        bookings.push(booking.clone());
        Ok(InsertOutcome::Created(booking))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.lock().await.iter().find(|b| b.id == id).cloned())
    }

    async fn find_most_recent_by_email_with_status(
        &self,
        email: &str,
        statuses: &[BookingStatus],
    ) -> Result<Option<Booking>, StoreError> {
        Ok(most_recent(&self.bookings.lock().await, email, statuses).cloned())
    }

    async fn find_many(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let mut found: Vec<Booking> = self
            .bookings
            .lock()
            .await
            .iter()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();

        // sort_by стабильный: при равном времени сохраняется порядок вставки
        found.sort_by(|a, b| match filter.sort {
            SortOrder::Asc => a.scheduled_at.cmp(&b.scheduled_at),
            SortOrder::Desc => b.scheduled_at.cmp(&a.scheduled_at),
        });

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(found.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(&self, id: Uuid, patch: &BookingPatch) -> Result<UpdateOutcome, StoreError> {
        let mut bookings = self.bookings.lock().await;
        let Some(index) = bookings.iter().position(|b| b.id == id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        let current = &bookings[index];
        if !patch.allowed_from().contains(&current.status) {
            return Ok(UpdateOutcome::Rejected(current.clone()));
        }
        if let Some(other) = active_conflict(&bookings, current, patch) {
            return Ok(UpdateOutcome::Duplicate(other.clone()));
        }

        let booking = &mut bookings[index];

        if let Some(ref name) = patch.requester_name {
            booking.requester_name = name.clone();
        }
        if let Some(ref email) = patch.requester_email {
            booking.requester_email = email.clone();
        }
        if let Some(when) = patch.scheduled_at {
            booking.scheduled_at = when;
        }
        if let Some(ref reason) = patch.reason {
            booking.reason = reason.clone();
        }
        if let Some(status) = patch.status {
            booking.status = status;
        }
        if !patch.is_empty() {
            booking.updated_at = Utc::now();
        }
        Ok(UpdateOutcome::Updated(booking.clone()))
    }

    async fn confirm(
        &self,
        id: Uuid,
        meeting_id: &str,
        payment_id: Option<&str>,
    ) -> Result<ConfirmOutcome, StoreError> {
        let mut bookings = self.bookings.lock().await;
        let Some(booking) = bookings.iter_mut().find(|b| b.id == id) else {
            return Ok(ConfirmOutcome::NotFound);
        };

        if !booking.status.is_confirmable() {
            return Ok(ConfirmOutcome::Unchanged(booking.clone()));
        }

        booking.status = BookingStatus::Confirmed;
        if booking.meeting_id.is_none() {
            booking.meeting_id = Some(meeting_id.to_string());
        }
        if let Some(payment_id) = payment_id {
            booking.payment_id = Some(payment_id.to_string());
        }
        booking.updated_at = Utc::now();
        Ok(ConfirmOutcome::Confirmed(booking.clone()))
    }
}
