use serde::Deserialize;
use std::env;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub store: StoreConfig,
    pub reservations: ReservationConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub notify: NotifyConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// Базовый origin фронтенда, из него собираются QR-ссылки билетов.
    pub frontend_origin: String,
}

// Настройки хранилища записей
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "postgres" или "memory".
    pub backend: String,
    pub database_url: Option<String>,
    pub pool_size: u32,
    /// JSON-файл с каталогом типов билетов для memory-бэкенда.
    pub fixtures: Option<String>,
}

// Настройки резервирования (холды с TTL)
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    /// "redis" или "memory".
    pub backend: String,
    pub redis_url: Option<String>,
    pub hold_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: i64,
}

impl ReservationConfig {
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

// Настройки платёжного верификатора
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// "gateway" или "mock".
    pub mode: String,
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    /// После стольких отклонённых проверок заказ отменяется.
    pub max_attempts: i32,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Настройки очереди уведомлений
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "kassa=debug,tower_http=debug".to_string()),
                frontend_origin: env::var("FRONTEND_ORIGIN")
                    .unwrap_or_else(|_| "https://tickets.example.kz".to_string()),
            },
            store: StoreConfig {
                backend: env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string()),
                database_url: env::var("DATABASE_URL").ok(),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
                fixtures: env::var("STORE_FIXTURES").ok(),
            },
            reservations: ReservationConfig {
                backend: env::var("RESERVATION_BACKEND").unwrap_or_else(|_| "redis".to_string()),
                redis_url: env::var("REDIS_URL").ok(),
                hold_ttl_seconds: env::var("HOLD_TTL_SECONDS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .expect("HOLD_TTL_SECONDS must be a valid number"),
                sweep_interval_seconds: env::var("SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .expect("SWEEP_INTERVAL_SECONDS must be a valid number"),
                sweep_batch_size: env::var("SWEEP_BATCH_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("SWEEP_BATCH_SIZE must be a valid number"),
            },
            payment: PaymentConfig {
                mode: env::var("PAYMENT_MODE").unwrap_or_else(|_| "gateway".to_string()),
                merchant_id: env::var("MERCHANT_ID").unwrap_or_else(|_| "kassa-demo".to_string()),
                merchant_password: env::var("MERCHANT_PASSWORD")
                    .unwrap_or_else(|_| "kassa-demo-password".to_string()),
                gateway_url: env::var("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|_| "https://gateway.hackload.com".to_string()),
                max_attempts: env::var("PAYMENT_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .expect("PAYMENT_MAX_ATTEMPTS must be a valid number"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number"),
                timeout_seconds: env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_TIMEOUT_SECONDS must be a valid number"),
            },
            notify: NotifyConfig {
                queue_capacity: env::var("NOTIFY_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "1024".to_string())
                    .parse()
                    .expect("NOTIFY_QUEUE_CAPACITY must be a valid number"),
            },
        }
    }
}

// Memory-бэкенды и mock-верификатор: поднимается без единой переменной
// окружения, этим пользуются тесты и локальная разработка.
impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                environment: "test".to_string(),
                rust_log: "kassa=debug".to_string(),
                frontend_origin: "https://tickets.example.kz".to_string(),
            },
            store: StoreConfig {
                backend: "memory".to_string(),
                database_url: None,
                pool_size: 5,
                fixtures: None,
            },
            reservations: ReservationConfig {
                backend: "memory".to_string(),
                redis_url: None,
                hold_ttl_seconds: 600,
                sweep_interval_seconds: 300,
                sweep_batch_size: 100,
            },
            payment: PaymentConfig {
                mode: "mock".to_string(),
                merchant_id: "kassa-demo".to_string(),
                merchant_password: "kassa-demo-password".to_string(),
                gateway_url: "http://localhost:9010".to_string(),
                max_attempts: 3,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                timeout_seconds: 60,
            },
            notify: NotifyConfig {
                queue_capacity: 1024,
            },
        }
    }
}
