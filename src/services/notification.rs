//! Уведомления о бронях.
//!
//! Жизненный цикл только ставит задачу в ограниченную очередь
//! (`NotificationDispatcher::dispatch` никогда не ждёт). `NotificationWorker`
//! забирает задачи из очереди и доставляет каждую в отдельной задаче tokio,
//! с повторами и экспоненциальной задержкой. Ошибки доставки только логируются.
//! Порядок писем для одной брони не гарантируется.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{EmailConfig, NotificationConfig};
use crate::models::Booking;
use crate::services::meeting::MeetingIdGenerator;

pub const CONFIRMATION_TEMPLATE: &str = "booking_confirmation";
pub const RESCHEDULE_TEMPLATE: &str = "booking_reschedule";
pub const CANCELLATION_TEMPLATE: &str = "booking_cancellation";

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Confirmation { booking: Booking, meeting_id: String },
    Reschedule { booking: Booking, new_time: DateTime<Utc> },
    Cancellation { booking: Booking },
}

/// Письмо в терминах интерфейса отправки: адресат, тема, шаблон, данные.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub template: &'static str,
    pub data: Value,
}

impl Notification {
    pub fn booking(&self) -> &Booking {
        match self {
            Notification::Confirmation { booking, .. }
            | Notification::Reschedule { booking, .. }
            | Notification::Cancellation { booking } => booking,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Confirmation { .. } => "confirmation",
            Notification::Reschedule { .. } => "reschedule",
            Notification::Cancellation { .. } => "cancellation",
        }
    }

    pub fn to_email(&self, meetings: &MeetingIdGenerator) -> OutgoingEmail {
        let booking = self.booking();
        let (subject, template, data) = match self {
            Notification::Confirmation { meeting_id, .. } => (
                "Your counseling session is confirmed",
                CONFIRMATION_TEMPLATE,
                json!({
                    "name": booking.requester_name,
                    "scheduledAt": booking.scheduled_at.to_rfc3339(),
                    "meetingId": meeting_id,
                    "meetingLink": meetings.join_link(meeting_id),
                }),
            ),
            Notification::Reschedule { new_time, .. } => (
                "Your counseling session has been rescheduled",
                RESCHEDULE_TEMPLATE,
                json!({
                    "name": booking.requester_name,
                    "newTime": new_time.to_rfc3339(),
                    "meetingId": booking.meeting_id,
                    "meetingLink": booking.meeting_id.as_deref().map(|id| meetings.join_link(id)),
                }),
            ),
            Notification::Cancellation { .. } => (
                "Your counseling session has been cancelled",
                CANCELLATION_TEMPLATE,
                json!({
                    "name": booking.requester_name,
                    "scheduledAt": booking.scheduled_at.to_rfc3339(),
                }),
            ),
        };

        OutgoingEmail {
            to: booking.requester_email.clone(),
            subject: subject.to_string(),
            template,
            data,
        }
    }
}

/// Постановка уведомлений в очередь. Клонируется дёшево.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn send_confirmation(&self, booking: &Booking, meeting_id: &str) {
        self.dispatch(Notification::Confirmation {
            booking: booking.clone(),
            meeting_id: meeting_id.to_string(),
        });
    }

    pub fn send_reschedule(&self, booking: &Booking, new_time: DateTime<Utc>) {
        self.dispatch(Notification::Reschedule { booking: booking.clone(), new_time });
    }

    pub fn send_cancellation(&self, booking: &Booking) {
        self.dispatch(Notification::Cancellation { booking: booking.clone() });
    }

    /// Не блокирует: при переполненной или закрытой очереди уведомление теряется.
    pub fn dispatch(&self, notification: Notification) {
        let booking_id = notification.booking().id;
        let kind = notification.kind();
        match self.tx.try_send(notification) {
            Ok(()) => debug!("Queued {} notification for booking {}", kind, booking_id),
            Err(TrySendError::Full(_)) => {
                warn!("Notification queue full - dropping {} notification for booking {}", kind, booking_id)
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Notification worker stopped - dropping {} notification for booking {}", kind, booking_id)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Интерфейс отправки писем. Движок шаблонов - забота реализации.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, template: &str, data: &Value) -> Result<(), EmailError>;
}

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("-")
}

/// Простой текстовый рендер известных шаблонов.
pub fn render_template(template: &str, data: &Value) -> String {
    let name = field(data, "name");
    match template {
        CONFIRMATION_TEMPLATE => format!(
            "Hello {},\n\nYour session on {} is confirmed.\nMeeting ID: {}\nJoin: {}\n",
            name,
            field(data, "scheduledAt"),
            field(data, "meetingId"),
            field(data, "meetingLink"),
        ),
        RESCHEDULE_TEMPLATE => {
            let mut body = format!(
                "Hello {},\n\nYour session has been moved to {}.\n",
                name,
                field(data, "newTime"),
            );
            if let Some(link) = data.get("meetingLink").and_then(Value::as_str) {
                body.push_str(&format!("Join: {}\n", link));
            }
            body
        }
        CANCELLATION_TEMPLATE => format!(
            "Hello {},\n\nYour session on {} has been cancelled.\n",
            name,
            field(data, "scheduledAt"),
        ),
        other => format!("{}\n\n{}", other, data),
    }
}

/// Отправка через SMTP (lettre).
#[derive(Clone)]
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        from: &str,
    ) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(port);
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.parse()?,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, subject: &str, template: &str, data: &Value) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(render_template(template, data))?;

        self.transport.send(message).await?;
        Ok(())
    }
}

/// Пишет письма в лог вместо отправки - для разработки без SMTP.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, template: &str, data: &Value) -> Result<(), EmailError> {
        info!(
            to = %to,
            template = %template,
            "Email '{}':\n{}",
            subject,
            render_template(template, data)
        );
        Ok(())
    }
}

/// Выбирает отправителя по конфигурации.
pub fn email_sender_from_config(config: &EmailConfig) -> Result<Arc<dyn EmailSender>, EmailError> {
    match config.smtp_host {
        Some(ref host) => Ok(Arc::new(SmtpEmailSender::new(
            host,
            config.smtp_port,
            config.smtp_username.clone(),
            config.smtp_password.clone(),
            &config.from,
        )?)),
        None => {
            warn!("SMTP_HOST is not set - emails will be written to the log");
            Ok(Arc::new(LogEmailSender))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Доставляет одно письмо с повторами. `true` - письмо ушло.
pub async fn deliver(sender: &dyn EmailSender, email: &OutgoingEmail, policy: RetryPolicy) -> bool {
    for attempt in 1..=policy.max_attempts {
        match sender.send(&email.to, &email.subject, email.template, &email.data).await {
            Ok(()) => {
                info!("Sent {} email to {} (attempt {})", email.template, email.to, attempt);
                return true;
            }
            Err(e) => {
                warn!(
                    "Failed to send {} email to {} (attempt {}/{}): {}",
                    email.template, email.to, attempt, policy.max_attempts, e
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    error!("Giving up on {} email to {}", email.template, email.to);
    false
}

pub struct NotificationWorker {
    rx: mpsc::Receiver<Notification>,
    sender: Arc<dyn EmailSender>,
    meetings: MeetingIdGenerator,
    policy: RetryPolicy,
    max_in_flight: usize,
}

impl NotificationWorker {
    pub fn new(
        rx: mpsc::Receiver<Notification>,
        sender: Arc<dyn EmailSender>,
        meetings: MeetingIdGenerator,
        policy: RetryPolicy,
        max_in_flight: usize,
    ) -> Self {
        Self { rx, sender, meetings, policy, max_in_flight: max_in_flight.max(1) }
    }

    /// Работает, пока живы все `NotificationDispatcher`; перед выходом
    /// дожидается уже начатых доставок.
    pub async fn run(mut self) {
        info!("Notification worker started");
        let mut deliveries = JoinSet::new();

        while let Some(notification) = self.rx.recv().await {
            // Пока все слоты заняты, очередь не разбирается и заполняется
            while deliveries.len() >= self.max_in_flight {
                deliveries.join_next().await;
            }

            let email = notification.to_email(&self.meetings);
            let sender = self.sender.clone();
            let policy = self.policy;
            deliveries.spawn(async move { deliver(sender.as_ref(), &email, policy).await });

            while deliveries.try_join_next().is_some() {}
        }

        while deliveries.join_next().await.is_some() {}
        info!("Notification worker stopped");
    }
}
