use std::env;
use std::str::FromStr;

// Ошибки чтения конфигурации из окружения
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub email: EmailConfig,
    pub notifications: NotificationConfig,
    pub meeting: MeetingConfig,
}

// Настройки приложения
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

// Настройки базы данных
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

// Настройки платежного шлюза.
// Без key_id/key_secret шлюз считается не настроенным.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub gateway_url: String,
    pub default_amount: i64,
    pub currency: String,
    pub timeout_seconds: u64,
}

impl PaymentConfig {
    /// Пара ключей, если обе заданы.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.key_id, &self.key_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

// Настройки Circuit Breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Настройки SMTP. Без smtp_host письма только пишутся в лог.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from: String,
}

// Очередь уведомлений
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub queue_capacity: usize,
    /// Сколько писем доставляется одновременно.
    pub max_in_flight: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MeetingConfig {
    pub base_url: String,
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn or_default(key: &'static str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parsed<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = or_default(key, default);
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: or_default("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000")?,
                environment: or_default("ENVIRONMENT", "development"),
                rust_log: or_default("RUST_LOG", "session_booking=debug,tower_http=debug"),
                log_format: parsed("LOG_FORMAT", "text")?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
                acquire_timeout_seconds: parsed("DB_ACQUIRE_TIMEOUT_SECONDS", "5")?,
            },
            payment: PaymentConfig {
                key_id: optional("PAYMENT_KEY_ID"),
                key_secret: optional("PAYMENT_KEY_SECRET"),
                gateway_url: or_default("PAYMENT_GATEWAY_URL", "https://api.razorpay.com/v1"),
                default_amount: parsed("PAYMENT_DEFAULT_AMOUNT", "50000")?,
                currency: or_default("PAYMENT_CURRENCY", "INR"),
                timeout_seconds: parsed("PAYMENT_TIMEOUT_SECONDS", "10")?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
            email: EmailConfig {
                smtp_host: optional("SMTP_HOST"),
                smtp_port: parsed("SMTP_PORT", "587")?,
                smtp_username: optional("SMTP_USERNAME"),
                smtp_password: optional("SMTP_PASSWORD"),
                from: or_default("EMAIL_FROM", "Counseling <no-reply@localhost>"),
            },
            notifications: NotificationConfig {
                queue_capacity: parsed("NOTIFICATION_QUEUE_CAPACITY", "1024")?,
                max_in_flight: parsed("NOTIFICATION_MAX_IN_FLIGHT", "16")?,
                max_attempts: parsed("NOTIFICATION_MAX_ATTEMPTS", "3")?,
                retry_base_ms: parsed("NOTIFICATION_RETRY_BASE_MS", "500")?,
            },
            meeting: MeetingConfig {
                base_url: or_default("MEETING_BASE_URL", "https://meet.jit.si"),
            },
        })
    }
}
