use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Comma-separated peer addresses whose `X-Forwarded-For`/`X-Real-IP` are believed.
    #[serde(default)]
    pub trusted_proxies: String,
}

impl ServerConfig {
    /// Parsed `trusted_proxies`. An invalid list trusts nobody; `validate` rejects
    /// it at startup.
    pub fn trusted_proxy_ips(&self) -> Vec<IpAddr> {
        parse_trusted_proxies(&self.trusted_proxies).unwrap_or_default()
    }
}

pub fn parse_trusted_proxies(list: &str) -> anyhow::Result<Vec<IpAddr>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map_err(|_| anyhow::anyhow!("server.trusted_proxies: '{}' is not an IP address", entry))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub bootstrap_admin_username: String,
    pub bootstrap_admin_password: String,
}

/// Circulation rules. These values only seed the `system_config` table; once a key
/// exists there the stored value wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CirculationConfig {
    pub loan_days: i64,
    pub daily_fine: i64,
    pub max_active_loans: i64,
    pub max_renewals: i64,
    pub damaged_fine_percent: i64,
    pub lost_fine_percent: i64,
    pub reminder_days_before: i64,
    pub block_on_unpaid_fines: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub api_base: String,
    pub api_token: String,
    pub account_number: String,
    pub bank_code: String,
    pub qr_base: String,
    pub expiry_minutes: i64,
    pub request_timeout_secs: u64,
    pub transaction_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub circulation: CirculationConfig,
    pub payment: PaymentConfig,
    pub jobs: JobsConfig,
    pub security: Option<SecurityConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl Default for CirculationConfig {
    fn default() -> Self {
        // Mirror defaults from config/default.toml
        Self {
            loan_days: 14,
            daily_fine: 5000,
            max_active_loans: 5,
            max_renewals: 1,
            damaged_fine_percent: 50,
            lost_fine_percent: 100,
            reminder_days_before: 2,
            block_on_unpaid_fines: true,
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: thuvien.toml (in CWD)
        .add_source(::config::File::with_name("thuvien").required(false));

    if let Ok(custom_path) = std::env::var("THUVIEN_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("THUVIEN").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    parse_trusted_proxies(&cfg.server.trusted_proxies)?;

    // Auth
    if cfg.auth.jwt_secret.trim().is_empty() {
        return Err(anyhow::anyhow!("auth.jwt_secret must not be empty"));
    }
    if cfg.auth.jwt_secret == "change-me-thuvien-dev-secret" && !cfg!(debug_assertions) {
        tracing::warn!("auth.jwt_secret still uses the development default");
    }
    if cfg.auth.token_ttl_hours <= 0 {
        return Err(anyhow::anyhow!("auth.token_ttl_hours must be > 0"));
    }
    if !(4..=31).contains(&cfg.auth.bcrypt_cost) {
        return Err(anyhow::anyhow!("auth.bcrypt_cost must be in 4..=31"));
    }

    validate_circulation(&cfg.circulation)?;

    // Payment
    if cfg.payment.expiry_minutes <= 0 {
        return Err(anyhow::anyhow!("payment.expiry_minutes must be > 0"));
    }
    if cfg.payment.request_timeout_secs == 0 {
        return Err(anyhow::anyhow!("payment.request_timeout_secs must be > 0"));
    }
    if cfg.payment.transaction_limit == 0 || cfg.payment.transaction_limit > 5000 {
        return Err(anyhow::anyhow!("payment.transaction_limit must be in 1..=5000"));
    }
    if cfg.payment.api_token.is_empty() {
        tracing::warn!("payment.api_token is empty - QR payments cannot be confirmed automatically");
    }

    // Jobs
    if cfg.jobs.interval_secs == 0 {
        return Err(anyhow::anyhow!("jobs.interval_secs must be > 0"));
    }

    Ok(())
}

/// Shared by config loading and `PUT /api/settings`.
pub fn validate_circulation(c: &CirculationConfig) -> anyhow::Result<()> {
    if c.loan_days <= 0 || c.loan_days > 365 {
        return Err(anyhow::anyhow!("circulation.loan_days must be in 1..=365"));
    }
    if c.daily_fine < 0 {
        return Err(anyhow::anyhow!("circulation.daily_fine must be >= 0"));
    }
    if c.max_active_loans <= 0 {
        return Err(anyhow::anyhow!("circulation.max_active_loans must be > 0"));
    }
    if c.max_renewals < 0 {
        return Err(anyhow::anyhow!("circulation.max_renewals must be >= 0"));
    }
    if !(0..=1000).contains(&c.damaged_fine_percent) {
        return Err(anyhow::anyhow!("circulation.damaged_fine_percent must be in 0..=1000"));
    }
    if !(0..=1000).contains(&c.lost_fine_percent) {
        return Err(anyhow::anyhow!("circulation.lost_fine_percent must be in 0..=1000"));
    }
    if c.reminder_days_before < 0 {
        return Err(anyhow::anyhow!("circulation.reminder_days_before must be >= 0"));
    }
    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // On Windows, handle URLs like sqlite:///C:/... by stripping the leading '/'
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
