use std::net::IpAddr;
use std::sync::Arc;

use crate::auth::TokenKeys;
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;
use crate::notify::{OutboxSink, ReminderSink};
use crate::payment::sepay::{PaymentGateway, SePayClient};

/// The shared application state.
///
/// Cloned into every handler by axum; everything inside is either a pool or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: sqlx::SqlitePool,
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// JWT signing and verification keys derived from `auth.jwt_secret`.
    pub keys: Arc<TokenKeys>,
    /// Bank transaction source used to confirm QR payments.
    pub gateway: Arc<dyn PaymentGateway>,
    /// Where the daily job delivers due-date reminders.
    pub reminders: Arc<dyn ReminderSink>,
    /// The application metrics.
    pub metrics: Metrics,
    /// The per-endpoint rate limiter.
    pub rate_limiter: EndpointRateLimiter,
    /// Peers allowed to name the client in `X-Forwarded-For`.
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl AppState {
    /// Creates a new `AppState` talking to the real SePay API and writing reminders
    /// to the notification outbox.
    ///
    /// Endpoint limits:
    ///   - 10 login attempts per minute
    ///   - 10 registrations per minute
    ///   - 120 payment status polls per minute
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> anyhow::Result<Self> {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(SePayClient::new(&config.payment)?);
        Ok(Self::with_gateway(db, config, gateway))
    }

    /// Same as [`AppState::new`] with an explicit gateway implementation.
    pub fn with_gateway(db: sqlx::SqlitePool, config: AppConfig, gateway: Arc<dyn PaymentGateway>) -> Self {
        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("/api/auth/login", 10, 60),
            ("/api/auth/register", 10, 60),
            ("/api/payments/{id}", 120, 60),
        ]);
        let reminders: Arc<dyn ReminderSink> = Arc::new(OutboxSink::new(db.clone()));

        let trusted_proxies: Arc<[IpAddr]> = config.server.trusted_proxy_ips().into();

        Self {
            trusted_proxies,
            keys: Arc::new(TokenKeys::new(&config.auth.jwt_secret)),
            db,
            config: Arc::new(config),
            gateway,
            reminders,
            metrics: Metrics::new(),
            rate_limiter,
        }
    }
}
