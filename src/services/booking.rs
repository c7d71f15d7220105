//! booking.rs
//!
//! Жизненный цикл брони: создание, платная инициация, проверка оплаты,
//! подтверждение, перенос и отмена.
//!
//! Переходы: `pending`/`payment_pending` -> `confirmed` -> `completed`,
//! любой нетерминальный -> `cancelled`. Из `cancelled` и `completed` статус
//! не меняется. Побочные эффекты (письма) только ставятся в очередь и никогда
//! не откатывают уже записанный переход.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::PaymentConfig;
use crate::error::BookingError;
use crate::models::booking::DEFAULT_REASON;
use crate::models::{
    Booking, BookingFilter, BookingPatch, BookingRequest, BookingStatus, NewBooking, PaymentOrder,
    PaymentVerification, SortOrder,
};
use crate::repository::{BookingStore, ConfirmOutcome, InsertOutcome, UpdateOutcome};
use crate::services::meeting::MeetingIdGenerator;
use crate::services::notification::NotificationDispatcher;
use crate::services::payment::PaymentGateway;
use crate::services::signature::PaymentVerifier;

/// Ограничение шлюза на длину receipt.
const MAX_RECEIPT_LEN: usize = 40;

/// Параметры платного сценария.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// Секрет для проверки подписи колбэка.
    pub key_secret: Option<String>,
    pub default_amount: i64,
    pub currency: String,
}

impl PaymentSettings {
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            key_secret: config.credentials().map(|(_, secret)| secret.to_string()),
            default_amount: config.default_amount,
            currency: config.currency.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BookingLifecycle {
    store: Arc<dyn BookingStore>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    notifier: NotificationDispatcher,
    meetings: MeetingIdGenerator,
    payment: PaymentSettings,
}

fn transition(from: BookingStatus, to: impl Into<String>) -> BookingError {
    BookingError::InvalidTransition { from, to: to.into() }
}

fn gateway_unavailable(reason: impl Into<String>) -> BookingError {
    BookingError::PaymentGatewayUnavailable(reason.into())
}

impl BookingLifecycle {
    pub fn new(
        store: Arc<dyn BookingStore>,
        notifier: NotificationDispatcher,
        meetings: MeetingIdGenerator,
        payment: PaymentSettings,
    ) -> Self {
        Self { store, gateway: None, notifier, meetings, payment }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Проверяет запрос и собирает запись для вставки.
    fn prepare(&self, request: BookingRequest, status: BookingStatus) -> Result<NewBooking, BookingError> {
        let request = BookingRequest {
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            ..request
        };
        request.validate()?;

        let scheduled_at = request
            .when
            .ok_or_else(|| BookingError::Validation("when is required".into()))?;
        let reason = request
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REASON.to_string());

        Ok(NewBooking {
            id: Uuid::new_v4(),
            requester_name: request.name,
            requester_email: request.email,
            scheduled_at,
            reason,
            status,
            requester_user_id: request.requester_user_id,
            order_id: None,
            amount: None,
            currency: None,
        })
    }

    async fn load(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.store.find_by_id(id).await?.ok_or(BookingError::NotFound(id))
    }

    async fn apply(&self, id: Uuid, patch: &BookingPatch) -> Result<Booking, BookingError> {
        let outcome = self.store.update(id, patch).await?;
        Self::settle(id, patch, outcome)
    }

    fn settle(id: Uuid, patch: &BookingPatch, outcome: UpdateOutcome) -> Result<Booking, BookingError> {
        match outcome {
            UpdateOutcome::Updated(booking) => Ok(booking),
            UpdateOutcome::Rejected(current) => {
                Err(transition(current.status, patch.status.map_or("rescheduled", |s| s.as_str())))
            }
            UpdateOutcome::Duplicate(other) => {
                debug!("Booking {} clashes with active booking {}", id, other.id);
                Err(BookingError::Conflict("another active booking exists for this email".into()))
            }
            UpdateOutcome::NotFound => Err(BookingError::NotFound(id)),
        }
    }

    /// Обрезает пробелы, проверяет поля и выкидывает неизменившееся время.
    /// Повтор терминального статуса тоже выкидывается: он уже не сменится.
    fn normalize(current: &Booking, patch: BookingPatch) -> Result<BookingPatch, BookingError> {
        let patch = BookingPatch {
            requester_name: patch.requester_name.map(|n| n.trim().to_string()),
            requester_email: patch.requester_email.map(|e| e.trim().to_string()),
            scheduled_at: patch.scheduled_at.filter(|when| *when != current.scheduled_at),
            status: patch.status.filter(|s| !(current.status.is_terminal() && *s == current.status)),
            ..patch
        };
        patch.validate()?;
        Ok(patch)
    }

    /// Прямое бронирование. Если у email уже есть `pending`/`confirmed` бронь,
    /// возвращается она (`InsertOutcome::Existing`), новая не создаётся.
    pub async fn create(&self, request: BookingRequest) -> Result<InsertOutcome, BookingError> {
        let new_booking = self.prepare(request, BookingStatus::Pending)?;
        let outcome = self.store.insert_unless_active(new_booking).await?;

        match &outcome {
            InsertOutcome::Created(b) => info!("Booking {} created for {}", b.id, b.scheduled_at),
            InsertOutcome::Existing(b) => {
                info!("Active booking {} already exists - returning it", b.id)
            }
        }
        Ok(outcome)
    }

    /// Платное бронирование: заказ в шлюзе + бронь в `payment_pending`.
    pub async fn initiate(
        &self,
        request: BookingRequest,
        amount: Option<i64>,
    ) -> Result<(Booking, PaymentOrder), BookingError> {
        let mut new_booking = self.prepare(request, BookingStatus::PaymentPending)?;

        let amount = amount.unwrap_or(self.payment.default_amount);
        if amount <= 0 {
            return Err(BookingError::Validation("amount must be positive".into()));
        }

        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| gateway_unavailable("payment gateway is not configured"))?;

        let mut receipt = format!("rcpt_{}", new_booking.id.simple());
        receipt.truncate(MAX_RECEIPT_LEN);

        let order = gateway
            .create_order(amount, &self.payment.currency, &receipt)
            .await
            .map_err(|e| gateway_unavailable(e.to_string()))?;

        new_booking.order_id = Some(order.id.clone());
        new_booking.amount = Some(order.amount);
        new_booking.currency = Some(order.currency.clone());

        let booking = self.store.insert(new_booking).await?;
        info!("Booking {} awaiting payment for order {}", booking.id, order.id);
        Ok((booking, order))
    }

    /// Проверяет колбэк шлюза и подтверждает бронь.
    /// Повтор для уже подтверждённой брони возвращает её без побочных эффектов.
    pub async fn verify_payment(&self, verification: &PaymentVerification) -> Result<Booking, BookingError> {
        let booking = self.load(verification.booking_id).await?;

        if booking.status == BookingStatus::Confirmed {
            debug!("Booking {} already confirmed - skipping verification", booking.id);
            return Ok(booking);
        }

        let secret = self
            .payment
            .key_secret
            .as_deref()
            .ok_or_else(|| gateway_unavailable("payment gateway is not configured"))?;

        if !PaymentVerifier::verify(
            secret,
            &verification.order_id,
            &verification.payment_id,
            &verification.signature,
        ) {
            warn!("Invalid payment signature for booking {}", booking.id);
            return Err(BookingError::InvalidSignature);
        }

        if booking.order_id.as_deref() != Some(verification.order_id.as_str()) {
            warn!("Order {} does not belong to booking {}", verification.order_id, booking.id);
            return Err(BookingError::Validation("order id does not match booking".into()));
        }

        if !booking.status.is_confirmable() {
            return Err(transition(booking.status, BookingStatus::Confirmed.as_str()));
        }

        self.confirm(&booking, Some(&verification.payment_id)).await
    }

    /// Переход в `confirmed`. Уведомление отправляет только тот вызов,
    /// чья запись прошла; проигравший получает сохранённую бронь.
    async fn confirm(&self, booking: &Booking, payment_id: Option<&str>) -> Result<Booking, BookingError> {
        let meeting_id = match booking.meeting_id {
            Some(ref id) => id.clone(),
            None => self
                .meetings
                .generate(&format!("{}:{}", booking.requester_email, booking.id)),
        };

        match self.store.confirm(booking.id, &meeting_id, payment_id).await? {
            ConfirmOutcome::Confirmed(confirmed) => {
                let stored_id = confirmed.meeting_id.clone().unwrap_or(meeting_id);
                info!("Booking {} confirmed, meeting {}", confirmed.id, stored_id);
                self.notifier.send_confirmation(&confirmed, &stored_id);
                Ok(confirmed)
            }
            ConfirmOutcome::Unchanged(current) if current.status == BookingStatus::Confirmed => {
                debug!("Booking {} was confirmed concurrently", current.id);
                Ok(current)
            }
            ConfirmOutcome::Unchanged(current) => {
                Err(transition(current.status, BookingStatus::Confirmed.as_str()))
            }
            ConfirmOutcome::NotFound => Err(BookingError::NotFound(booking.id)),
        }
    }

    /// Общее обновление с двумя особыми случаями: подтверждение и перенос.
    /// Допустимость по статусу проверяет само хранилище в момент записи.
    pub async fn update(&self, id: Uuid, patch: BookingPatch) -> Result<Booking, BookingError> {
        let current = self.load(id).await?;
        let patch = Self::normalize(&current, patch)?;

        if patch.status == Some(BookingStatus::Confirmed) && current.status != BookingStatus::Confirmed {
            if current.status.is_terminal() {
                return Err(transition(current.status, BookingStatus::Confirmed.as_str()));
            }

            let rest = patch.without_status();
            let target = if rest.is_empty() { current } else { self.apply(id, &rest).await? };
            return self.confirm(&target, None).await;
        }

        let updated = self.apply(id, &patch).await?;
        if let Some(when) = patch.scheduled_at {
            info!("Booking {} rescheduled to {}", id, when);
            self.notifier.send_reschedule(&updated, when);
        }
        Ok(updated)
    }

    /// Мягкая отмена. Повторная отмена не ошибка и снова шлёт письмо.
    pub async fn cancel(&self, id: Uuid) -> Result<Booking, BookingError> {
        let current = self.load(id).await?;

        let cancelled = if current.status == BookingStatus::Cancelled {
            current
        } else {
            let patch = BookingPatch { status: Some(BookingStatus::Cancelled), ..Default::default() };
            match self.store.update(id, &patch).await? {
                // Кто-то отменил раньше нас
                UpdateOutcome::Rejected(latest) if latest.status == BookingStatus::Cancelled => latest,
                outcome => Self::settle(id, &patch, outcome)?,
            }
        };

        info!("Booking {} cancelled", id);
        self.notifier.send_cancellation(&cancelled);
        Ok(cancelled)
    }

    pub async fn list(&self, filter: &BookingFilter) -> Result<Vec<Booking>, BookingError> {
        Ok(self.store.find_many(filter).await?)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.load(id).await
    }

    /// Все брони по email, новые сначала.
    pub async fn get_by_email(&self, email: &str) -> Result<Vec<Booking>, BookingError> {
        let filter = BookingFilter {
            requester_email: Some(email.trim().to_string()),
            sort: SortOrder::Desc,
            ..Default::default()
        };
        self.list(&filter).await
    }
}
