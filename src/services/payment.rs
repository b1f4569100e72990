//! payment.rs
//!
//! Сервисный слой проверки оплаты заказа.
//!
//! Ключевые компоненты:
//! 1.  **CircuitBreaker**: "Автоматический выключатель" вокруг внешнего
//!     платёжного шлюза. После серии сбоев запросы блокируются на таймаут,
//!     затем пропускается один пробный.
//! 2.  **GatewayVerifier**: клиент внешнего шлюза. Локально сверяет подпись
//!     запроса, затем спрашивает шлюз о статусе платежа. Сетевые вызовы
//!     защищены Circuit Breaker.
//! 3.  **MockVerifier**: детерминированный верификатор без сети для тестов
//!     и локальной разработки.
//!
//! Верификатор никогда сам не меняет заказ: он возвращает решение
//! (подтверждено/отклонено) или ошибку недоступности, а переходы статусов
//! делает Order Lifecycle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::error::ApiError;
use crate::models::Order;

/// Состояния "Автоматического выключателя" (Circuit Breaker).
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Нормальный режим, запросы разрешены.
    Closed,
    /// Режим блокировки после серии сбоев.
    Open,
    /// После таймаута разрешён один пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    /// Момент последнего сбоя; `None`, пока сбоев не было.
    last_failure: Mutex<Option<Instant>>,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            failure_threshold,
            timeout_duration: Duration::from_secs(timeout_seconds),
        }
    }

    /// Можно ли выполнить следующий запрос к сервису.
    pub fn can_execute(&self) -> bool {
        let state = self.state.read().unwrap();

        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .lock()
                    .unwrap()
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.timeout_duration {
                    drop(state);
                    *self.state.write().unwrap() = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();

        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                info!("Circuit breaker recovered - transitioning to Closed state");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure.lock().unwrap() = Some(Instant::now());

        let mut state = self.state.write().unwrap();

        match *state {
            CircuitState::Closed => {
                if failure_count >= self.failure_threshold {
                    *state = CircuitState::Open;
                    error!(
                        "Circuit breaker OPENED - {} failures reached threshold {}",
                        failure_count, self.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn get_state(&self) -> CircuitState {
        self.state.read().unwrap().clone()
    }
}

/// Решение верификатора по конкретной попытке оплаты.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentDecision {
    Confirmed,
    Rejected { reason: String },
}

/// Данные инициации оплаты, отдаются клиенту вместе с созданным заказом.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitData {
    pub provider: String,
    pub provider_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

/// Запрос проверки статуса платежа во внешнем шлюзе.
#[derive(Debug, Serialize)]
struct PaymentCheckRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    #[serde(rename = "paymentId")]
    payment_id: String,
}

/// Ответ шлюза на проверку статуса.
#[derive(Debug, Deserialize)]
struct PaymentCheckResponse {
    success: bool,
    status: Option<String>,
    code: Option<i32>,
    message: Option<String>,
}

#[derive(Clone)]
pub enum PaymentVerifier {
    Gateway(GatewayVerifier),
    Mock(MockVerifier),
}

impl PaymentVerifier {
    pub fn from_config(payment: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Self {
        match payment.mode.as_str() {
            "mock" => PaymentVerifier::Mock(MockVerifier::new(payment)),
            _ => PaymentVerifier::Gateway(GatewayVerifier::from_config(payment, breaker)),
        }
    }

    /// Данные инициации оплаты для свежесозданного заказа.
    pub fn init_data(&self, order: &Order) -> PaymentInitData {
        match self {
            PaymentVerifier::Gateway(v) => v.init_data(order),
            PaymentVerifier::Mock(v) => v.init_data(order),
        }
    }

    /// Проверка попытки оплаты. `Err(VerifierUnavailable)` означает
    /// «ответа нет», а не «оплата отклонена».
    pub async fn verify(
        &self,
        order: &Order,
        provider_ref: &str,
        provider_signature: &str,
    ) -> Result<PaymentDecision, ApiError> {
        match self {
            PaymentVerifier::Gateway(v) => v.verify(order, provider_ref, provider_signature).await,
            PaymentVerifier::Mock(v) => Ok(v.verify(order, provider_ref, provider_signature)),
        }
    }
}

/// Подпись суммы заказа: sha256(amount + currency + order_id + password + merchant).
fn order_signature(order: &Order, password: &str, merchant_id: &str) -> String {
    let token_string = format!(
        "{}{}{}{}{}",
        order.total_amount_minor, order.currency, order.id, password, merchant_id
    );
    let mut hasher = Sha256::new();
    hasher.update(token_string.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct GatewayVerifier {
    team_slug: String,
    password: String,
    base_url: String,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl GatewayVerifier {
    pub fn from_config(payment: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Self {
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            breaker.failure_threshold,
            breaker.timeout_seconds,
        ));

        Self {
            team_slug: payment.merchant_id.clone(),
            password: payment.merchant_password.clone(),
            base_url: payment.gateway_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state()
    }

    fn init_data(&self, order: &Order) -> PaymentInitData {
        let provider_ref = format!("order-{}", order.id);
        let signature = order_signature(order, &self.password, &self.team_slug);
        PaymentInitData {
            provider: "gateway".to_string(),
            checkout_url: Some(format!(
                "{}/checkout?orderId={}&amount={}&currency={}&signature={}",
                self.base_url, order.id, order.total_amount_minor, order.currency, signature
            )),
            provider_ref,
        }
    }

    /// Токен запроса проверки статуса: sha256(payment_id + password + merchant).
    fn generate_check_token(&self, payment_id: &str) -> String {
        let token_string = format!("{}{}{}", payment_id, self.password, self.team_slug);
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn verify(
        &self,
        order: &Order,
        provider_ref: &str,
        provider_signature: &str,
    ) -> Result<PaymentDecision, ApiError> {
        // Подпись сверяется локально, до похода в сеть.
        let expected = order_signature(order, &self.password, &self.team_slug);
        if provider_signature != expected {
            warn!("payment signature mismatch for order {}", order.id);
            return Ok(PaymentDecision::Rejected {
                reason: "signature mismatch".to_string(),
            });
        }

        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(ApiError::VerifierUnavailable);
        }

        let request = PaymentCheckRequest {
            team_slug: self.team_slug.clone(),
            token: self.generate_check_token(provider_ref),
            payment_id: provider_ref.to_string(),
        };

        let response = self
            .http_client
            .post(format!("{}/api/v1/PaymentCheck/check", self.base_url))
            .json(&request)
            .send()
            .await;

        let check: PaymentCheckResponse = match response {
            Ok(resp) => match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    error!("Payment gateway returned unparseable body: {e}");
                    self.circuit_breaker.record_failure();
                    return Err(ApiError::VerifierUnavailable);
                }
            },
            Err(e) => {
                error!("Payment gateway request failed: {e}");
                self.circuit_breaker.record_failure();
                return Err(ApiError::VerifierUnavailable);
            }
        };
        self.circuit_breaker.record_success();

        match check.status.as_deref() {
            Some("CONFIRMED") | Some("AUTHORIZED") if check.success => {
                Ok(PaymentDecision::Confirmed)
            }
            Some(status) => Ok(PaymentDecision::Rejected {
                reason: format!("gateway status {status}"),
            }),
            None => Ok(PaymentDecision::Rejected {
                reason: check
                    .message
                    .unwrap_or_else(|| format!("gateway code {:?}", check.code)),
            }),
        }
    }
}

/// Верификатор без сети: подпись считается тем же рецептом, что и у шлюза,
/// поэтому клиент (или тест) подтверждает заказ данными из `init_data`.
#[derive(Clone)]
pub struct MockVerifier {
    team_slug: String,
    password: String,
}

impl MockVerifier {
    pub fn new(payment: &PaymentConfig) -> Self {
        Self {
            team_slug: payment.merchant_id.clone(),
            password: payment.merchant_password.clone(),
        }
    }

    fn init_data(&self, order: &Order) -> PaymentInitData {
        PaymentInitData {
            provider: "mock".to_string(),
            provider_ref: format!("mock-{}", order.id),
            checkout_url: None,
        }
    }

    fn verify(
        &self,
        order: &Order,
        provider_ref: &str,
        provider_signature: &str,
    ) -> PaymentDecision {
        if !provider_ref.starts_with("mock-") {
            return PaymentDecision::Rejected {
                reason: "unknown provider reference".to_string(),
            };
        }
        let expected = order_signature(order, &self.password, &self.team_slug);
        if provider_signature == expected {
            PaymentDecision::Confirmed
        } else {
            PaymentDecision::Rejected {
                reason: "signature mismatch".to_string(),
            }
        }
    }
}

/// Подпись для подтверждения заказа тем же рецептом, что у верификатора.
/// Нужна клиентским тестам и демо-скриптам.
pub fn expected_signature(order: &Order, payment: &PaymentConfig) -> String {
    order_signature(order, &payment.merchant_password, &payment.merchant_id)
}
