#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use session_booking::models::{BookingRequest, PaymentOrder};
use session_booking::repository::InMemoryBookingStore;
use session_booking::services::booking::{BookingLifecycle, PaymentSettings};
use session_booking::services::meeting::MeetingIdGenerator;
use session_booking::services::notification::{Notification, NotificationDispatcher};
use session_booking::services::payment::{GatewayError, PaymentGateway};

pub const SECRET: &str = "test_secret";
pub const MEETING_BASE: &str = "https://meet.example.com";

/// Шлюз, который выдаёт заказы `order_1`, `order_2`, ...
#[derive(Default)]
pub struct StubGateway {
    orders: AtomicU32,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<PaymentOrder, GatewayError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentOrder {
            id: format!("order_{}", n),
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
            status: "created".into(),
        })
    }
}

/// Шлюз, который всегда недоступен.
pub struct DownGateway;

#[async_trait]
impl PaymentGateway for DownGateway {
    async fn create_order(&self, _: i64, _: &str, _: &str) -> Result<PaymentOrder, GatewayError> {
        Err(GatewayError::CircuitOpen)
    }
}

pub struct Harness {
    pub lifecycle: BookingLifecycle,
    pub store: InMemoryBookingStore,
    pub rx: mpsc::Receiver<Notification>,
}

impl Harness {
    pub fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = InMemoryBookingStore::new();
        let (notifier, rx) = NotificationDispatcher::channel(64);
        let lifecycle = BookingLifecycle::new(
            Arc::new(store.clone()),
            notifier,
            MeetingIdGenerator::new(MEETING_BASE),
            PaymentSettings {
                key_secret: Some(SECRET.into()),
                default_amount: 50000,
                currency: "INR".into(),
            },
        )
        .with_gateway(gateway);

        Self { lifecycle, store, rx }
    }

    pub fn new() -> Self {
        Self::with_gateway(Arc::new(StubGateway::default()))
    }

    /// Всё, что успели поставить в очередь.
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            out.push(n);
        }
        out
    }
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
}

pub fn request(email: &str) -> BookingRequest {
    BookingRequest {
        name: "A".into(),
        email: email.into(),
        when: Some(at(10)),
        reason: Some("intro".into()),
        requester_user_id: None,
    }
}

pub fn is_meeting_id(value: &str) -> bool {
    value.len() == 12 && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}
