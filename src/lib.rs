pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod services;

use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::repository::BookingStore;
use crate::services::booking::{BookingLifecycle, PaymentSettings};
use crate::services::meeting::MeetingIdGenerator;
use crate::services::notification::{
    email_sender_from_config, NotificationDispatcher, NotificationWorker, RetryPolicy,
};
use crate::services::payment::PaymentGatewayClient;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: BookingLifecycle,
}

impl AppState {
    pub fn new(lifecycle: BookingLifecycle) -> Arc<Self> {
        Arc::new(Self { lifecycle })
    }

    /// Собирает состояние поверх готовой БД. Воркер уведомлений возвращается
    /// отдельно, запускать его должен вызывающий.
    pub fn from_config(
        config: &Config,
        db: &Database,
    ) -> anyhow::Result<(Arc<Self>, NotificationWorker)> {
        let store: Arc<dyn BookingStore> = Arc::new(db.booking_store());
        let meetings = MeetingIdGenerator::new(config.meeting.base_url.clone());

        let (notifier, rx) = NotificationDispatcher::channel(config.notifications.queue_capacity);
        let sender = email_sender_from_config(&config.email).context("Failed to set up email sender")?;
        let worker = NotificationWorker::new(
            rx,
            sender,
            meetings.clone(),
            RetryPolicy::from_config(&config.notifications),
            config.notifications.max_in_flight,
        );

        let mut lifecycle = BookingLifecycle::new(
            store,
            notifier,
            meetings,
            PaymentSettings::from_config(&config.payment),
        );

        let gateway = PaymentGatewayClient::from_config(&config.payment, &config.circuit_breaker)
            .context("Failed to build payment gateway client")?;
        if let Some(client) = gateway {
            info!("Payment gateway configured at {}", config.payment.gateway_url);
            lifecycle = lifecycle.with_gateway(Arc::new(client));
        }

        Ok((Self::new(lifecycle), worker))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Session Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .merge(controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
