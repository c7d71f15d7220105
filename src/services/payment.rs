//! payment.rs
//!
//! Сервисный слой для взаимодействия с внешним платёжным шлюзом.
//!
//! Ключевые компоненты:
//! 1.  **CircuitBreaker**: Реализация паттерна "Автоматический выключатель" для обеспечения
//!     отказоустойчивости при работе с внешним API. Он предотвращает постоянные запросы
//!     к неработающему сервису.
//! 2.  **PaymentGateway**: Контракт шлюза, который нужен жизненному циклу брони -
//!     только создание заказа. Проверка подписи сюда не входит (см. `signature`).
//! 3.  **PaymentGatewayClient**: HTTP-клиент шлюза с таймаутом на каждый запрос.
//!     Все сетевые вызовы защищены с помощью `CircuitBreaker`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::models::PaymentOrder;

/// Состояния "Автоматического выключателя" (Circuit Breaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// **Closed (Замкнуто)**: Нормальный режим работы. Запросы к сервису разрешены.
    Closed,
    /// **Open (Разомкнуто)**: Режим блокировки. Запросы к сервису временно запрещены
    /// после обнаружения множественных сбоев.
    Open,
    /// **HalfOpen (Полуоткрыто)**: Тестовый режим. После таймаута в состоянии Open,
    /// разрешается пробный запрос для проверки, восстановился ли сервис.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Счетчик последовательных сбоев.
    failure_count: u32,
    /// Момент перехода в Open для расчета таймаута.
    opened_at: Option<Instant>,
    /// Когда был пропущен пробный запрос в HalfOpen.
    trial_started_at: Option<Instant>,
}

/// Реализация паттерна "Автоматический выключатель" для контроля доступа к внешнему сервису.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    /// Порог сбоев, после которого выключатель переходит в состояние Open.
    failure_threshold: u32,
    /// Длительность таймаута в состоянии Open, после которого происходит переход в HalfOpen.
    timeout_duration: Duration,
}

impl CircuitBreaker {
    /// Создает новый экземпляр CircuitBreaker.
    pub fn new(failure_threshold: u32, timeout_duration: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_started_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            timeout_duration,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, Duration::from_secs(config.timeout_seconds))
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Внутри блокировки нет паник, отравление не несёт смысла
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Проверяет, можно ли выполнить следующий запрос к сервису.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        let state = inner.state;

        match state {
            CircuitState::Closed => true,
            // Один пробный запрос за раз. Если проба потерялась (future отменён),
            // через таймаут пропускаем следующую.
            CircuitState::HalfOpen => {
                let stale = inner
                    .trial_started_at
                    .map_or(true, |at| at.elapsed() >= self.timeout_duration);
                if stale {
                    inner.trial_started_at = Some(Instant::now());
                }
                stale
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
                if elapsed >= self.timeout_duration {
                    // Таймаут истёк - пропускаем пробный запрос.
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started_at = Some(Instant::now());
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Регистрирует успешное выполнение запроса.
    pub fn record_success(&self) {
        let mut inner = self.lock();

        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.trial_started_at = None;
    }

    /// Регистрирует неудачное выполнение запроса.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.trial_started_at = None;
        let state = inner.state;

        match state {
            // Если в "замкнутом" состоянии достигнут порог ошибок, "размыкаем" цепь.
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    inner.failure_count, self.failure_threshold
                );
            }
            // Если тестовый запрос в HalfOpen провалился, возвращаемся в Open.
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    /// Возвращает текущее состояние выключателя для мониторинга.
    pub fn get_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }
}

/// Ошибки обращения к шлюзу. Для жизненного цикла брони любая из них
/// означает "шлюз недоступен", а не отказ в оплате.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,
    #[error("payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    /// Говорит ли ошибка о сбое самого шлюза. Отказ 4xx означает, что шлюз
    /// жив и ответил по существу.
    pub fn is_gateway_failure(&self) -> bool {
        match self {
            GatewayError::CircuitOpen => false,
            GatewayError::Http(_) => true,
            GatewayError::Rejected { status, .. } => *status >= 500,
        }
    }
}

/// То, что жизненному циклу нужно от шлюза.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<PaymentOrder, GatewayError>;
}

// --- Модели данных для API платёжного шлюза ---

/// Запрос на создание заказа.
#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

/// Ответ шлюза на создание заказа.
#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: Option<GatewayErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    description: Option<String>,
}

/// Клиент для взаимодействия с API платёжного шлюза.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    /// Публичный идентификатор ключа.
    key_id: String,
    /// Секрет ключа (basic auth).
    key_secret: String,
    /// Базовый URL платёжного шлюза.
    base_url: String,
    /// Асинхронный HTTP-клиент.
    http_client: reqwest::Client,
    /// Экземпляр Circuit Breaker для этого клиента.
    circuit_breaker: Arc<CircuitBreaker>,
}

impl PaymentGatewayClient {
    pub fn new(
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            circuit_breaker,
        })
    }

    /// Создает клиент на основе настроек приложения.
    /// `Ok(None)` - ключи не заданы, платный сценарий выключен.
    pub fn from_config(
        config: &PaymentConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Option<Self>, GatewayError> {
        let Some((key_id, key_secret)) = config.credentials() else {
            warn!("Payment gateway credentials are not configured - paid bookings disabled");
            return Ok(None);
        };

        Self::new(
            key_id,
            key_secret,
            config.gateway_url.clone(),
            Duration::from_secs(config.timeout_seconds),
            Arc::new(CircuitBreaker::from_config(breaker)),
        )
        .map(Some)
    }

    /// Выполняет асинхронную операцию, пропуская её через Circuit Breaker.
    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, GatewayError>>,
    {
        // Перед выполнением запроса проверяем состояние выключателя.
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(GatewayError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) if e.is_gateway_failure() => {
                error!("Payment gateway request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                Err(e)
            }
            Err(e) => {
                warn!("Payment gateway refused request: {}", e);
                self.circuit_breaker.record_success();
                Err(e)
            }
        }
    }

    /// Возвращает текущее состояние Circuit Breaker для мониторинга.
    pub fn get_circuit_breaker_status(&self) -> (CircuitState, u32) {
        (self.circuit_breaker.get_state(), self.circuit_breaker.failure_count())
    }

    async fn send_create_order(
        &self,
        request: &CreateOrderRequest<'_>,
    ) -> Result<PaymentOrder, GatewayError> {
        let response = self
            .http_client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<GatewayErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .and_then(|d| d.description)
                .unwrap_or_else(|| "unknown gateway error".to_string());
            return Err(GatewayError::Rejected { status: status.as_u16(), message });
        }

        let body = response.json::<CreateOrderResponse>().await?;
        Ok(PaymentOrder {
            id: body.id,
            amount: body.amount,
            currency: body.currency,
            receipt: body.receipt.unwrap_or_else(|| request.receipt.to_string()),
            status: body.status.unwrap_or_else(|| "created".to_string()),
        })
    }
}

#[async_trait]
impl PaymentGateway for PaymentGatewayClient {
    /// Создаёт заказ в платёжной системе, используя защиту Circuit Breaker.
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<PaymentOrder, GatewayError> {
        let request = CreateOrderRequest { amount, currency, receipt };

        info!("Creating payment order: amount={}, currency={}, receipt={}", amount, currency, receipt);

        self.execute_with_circuit_breaker(self.send_create_order(&request)).await
    }
}
