use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Причина по умолчанию, если клиент её не указал.
pub const DEFAULT_REASON: &str = "Not specified";

/// Статус брони. `cancelled` и `completed` - терминальные.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    PaymentPending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Статусы, которые учитываются при проверке дублей.
    pub const ACTIVE: [BookingStatus; 2] = [BookingStatus::Pending, BookingStatus::Confirmed];

    /// Нетерминальные статусы: только из них меняются статус и время.
    pub const OPEN: [BookingStatus; 3] =
        [BookingStatus::Pending, BookingStatus::PaymentPending, BookingStatus::Confirmed];

    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::PaymentPending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::PaymentPending => "payment_pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Из этих статусов бронь можно подтвердить.
    pub fn is_confirmable(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::PaymentPending)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "payment_pending" => Ok(BookingStatus::PaymentPending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub requester_name: String,
    pub requester_email: String,
    pub scheduled_at: DateTime<Utc>,
    pub reason: String,
    pub status: BookingStatus,
    pub requester_user_id: Option<Uuid>,
    pub meeting_id: Option<String>,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.requester_user_id == Some(user_id)
    }
}

/// Входящий запрос на бронирование (прямое или платное).
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BookingRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    #[validate(email(message = "email is malformed"))]
    pub email: String,
    #[validate(required(message = "when is required"))]
    pub when: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    #[serde(skip)]
    pub requester_user_id: Option<Uuid>,
}

/// Запись, готовая к вставке в хранилище.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Uuid,
    pub requester_name: String,
    pub requester_email: String,
    pub scheduled_at: DateTime<Utc>,
    pub reason: String,
    pub status: BookingStatus,
    pub requester_user_id: Option<Uuid>,
    pub order_id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

/// Частичное обновление брони. `meeting_id` сюда намеренно не входит.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookingPatch {
    #[serde(alias = "name")]
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub requester_name: Option<String>,
    #[serde(alias = "email")]
    #[validate(email(message = "email is malformed"))]
    pub requester_email: Option<String>,
    #[serde(rename = "when")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub status: Option<BookingStatus>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        *self == BookingPatch::default()
    }

    pub fn without_status(&self) -> BookingPatch {
        BookingPatch {
            status: None,
            ..self.clone()
        }
    }

    /// Трогает ли патч статус или время встречи.
    pub fn changes_lifecycle(&self) -> bool {
        self.status.is_some() || self.scheduled_at.is_some()
    }

    /// Статусы, из которых патч можно записать.
    pub fn allowed_from(&self) -> &'static [BookingStatus] {
        if self.changes_lifecycle() {
            &BookingStatus::OPEN
        } else {
            &BookingStatus::ALL
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("sort must be asc | desc, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub statuses: Vec<BookingStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub requester_user_id: Option<Uuid>,
    pub requester_email: Option<String>,
    pub sort: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&booking.status) {
            return false;
        }
        if self.from.is_some_and(|from| booking.scheduled_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| booking.scheduled_at > to) {
            return false;
        }
        if let Some(user_id) = self.requester_user_id {
            if !booking.is_owned_by(user_id) {
                return false;
            }
        }
        if let Some(ref email) = self.requester_email {
            if !booking.requester_email.eq_ignore_ascii_case(email) {
                return false;
            }
        }
        true
    }
}

/// Заказ на стороне платёжного шлюза.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub status: String,
}

/// Колбэк шлюза после оплаты.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub booking_id: Uuid,
    pub payment_id: String,
    pub order_id: String,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn booking(status: BookingStatus) -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            requester_name: "A".into(),
            requester_email: "a@x.com".into(),
            scheduled_at: Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
            reason: DEFAULT_REASON.into(),
            status,
            requester_user_id: None,
            meeting_id: None,
            order_id: None,
            payment_id: None,
            amount: None,
            currency: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::PaymentPending,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
        assert!("paid".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn only_pending_and_confirmed_are_active() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Confirmed.is_active());
        assert!(!BookingStatus::PaymentPending.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
    }

    #[test]
    fn patch_deserializes_when_alias() {
        let patch: BookingPatch =
            serde_json::from_str(r#"{"when":"2025-02-01T09:30:00Z","status":"confirmed"}"#).unwrap();
        assert_eq!(
            patch.scheduled_at,
            Some(Utc.with_ymd_and_hms(2025, 2, 1, 9, 30, 0).unwrap())
        );
        assert_eq!(patch.status, Some(BookingStatus::Confirmed));
        assert!(patch.changes_lifecycle());
        assert_eq!(patch.allowed_from(), &BookingStatus::OPEN);
    }

    #[test]
    fn text_only_patch_is_allowed_from_any_status() {
        let patch = BookingPatch { reason: Some("notes".into()), ..Default::default() };
        assert!(!patch.changes_lifecycle());
        assert_eq!(patch.allowed_from(), &BookingStatus::ALL);
    }

    #[test]
    fn patch_validation_rejects_blank_name_and_bad_email() {
        let patch = BookingPatch {
            requester_name: Some(String::new()),
            requester_email: Some("not-an-email".into()),
            ..Default::default()
        };
        let errors = patch.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("requester_name"));
        assert!(fields.contains_key("requester_email"));

        assert!(BookingPatch::default().validate().is_ok());
    }

    #[test]
    fn missing_name_and_email_reach_validation() {
        let req: BookingRequest = serde_json::from_str(r#"{"when":"2025-01-01T10:00:00Z"}"#).unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
    }

    #[test]
    fn filter_applies_date_bounds_and_email() {
        let b = booking(BookingStatus::Pending);
        let mut filter = BookingFilter {
            from: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap()),
            requester_email: Some("A@X.com".into()),
            ..Default::default()
        };
        assert!(filter.matches(&b));

        filter.statuses = vec![BookingStatus::Confirmed];
        assert!(!filter.matches(&b));
    }

    #[test]
    fn request_validation_rejects_missing_fields() {
        let req = BookingRequest {
            name: String::new(),
            email: "not-an-email".into(),
            when: None,
            ..Default::default()
        };
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("when"));
    }
}
