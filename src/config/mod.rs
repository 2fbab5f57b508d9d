//! Gateway configuration.
//!
//! Load order: `GATEWAY_CONFIG` env var (path to a TOML file) -> `gateway.toml`
//! in the current directory -> built-in defaults. Call [`init`] once at
//! startup, then reach the config anywhere with [`get`].
//!
//! ```ignore
//! config::init(GatewayConfig::load());
//! let cooldown = config::get().notifications.default_cooldown_seconds;
//! ```

pub mod defaults;

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

static GATEWAY_CONFIG: OnceLock<GatewayConfig> = OnceLock::new();

/// Install the process-wide configuration. Warns (does not panic) if called
/// more than once; the first call wins.
pub fn init(config: GatewayConfig) {
    if GATEWAY_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once; keeping first value");
    }
}

/// Fetch the process-wide configuration.
///
/// # Panics
/// Panics if called before [`init`] — that is a startup bug, not a
/// recoverable runtime condition.
pub fn get() -> &'static GatewayConfig {
    GATEWAY_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    GATEWAY_CONFIG.get().is_some()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub default_cooldown_seconds: u64,
    /// Escalation dwell ladder in seconds, one entry per `EscalationLevel`
    /// rung: time an unacknowledged alert waits at each rung before
    /// advancing to the next.
    pub escalation_dwell_seconds: [u64; 5],
    pub ntfy_topic: Option<String>,
    pub ntfy_url: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub twilio_to_number: Option<String>,
    pub whatsapp_from_number: Option<String>,
    pub whatsapp_to_number: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub alert_email_to: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            default_cooldown_seconds: defaults::DEFAULT_COOLDOWN_SECONDS,
            escalation_dwell_seconds: defaults::ESCALATION_DWELL_LADDER,
            ntfy_topic: None,
            ntfy_url: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_from_number: None,
            twilio_to_number: None,
            whatsapp_from_number: None,
            whatsapp_to_number: None,
            smtp_host: None,
            smtp_port: None,
            smtp_user: None,
            smtp_password: None,
            alert_email_to: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub anomaly_warning_sigma: f64,
    pub anomaly_critical_sigma: f64,
    pub min_samples_for_anomaly: u64,
    pub vpd_optimal_low_kpa: f64,
    pub vpd_optimal_high_kpa: f64,
    pub dli_photoperiod_hours: f64,
    /// "local" or "utc"; see the DLI-reset open question in DESIGN.md.
    pub timezone: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            anomaly_warning_sigma: defaults::ANOMALY_WARNING_SIGMA,
            anomaly_critical_sigma: defaults::ANOMALY_CRITICAL_SIGMA,
            min_samples_for_anomaly: defaults::MIN_SAMPLES_FOR_ANOMALY,
            vpd_optimal_low_kpa: defaults::VPD_OPTIMAL_LOW_KPA,
            vpd_optimal_high_kpa: defaults::VPD_OPTIMAL_HIGH_KPA,
            dli_photoperiod_hours: defaults::DLI_PHOTOPERIOD_HOURS,
            timezone: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    pub warning_delta: f64,
    pub critical_delta: f64,
    pub min_samples: u64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            warning_delta: defaults::DRIFT_WARNING_DELTA,
            critical_delta: defaults::DRIFT_CRITICAL_DELTA,
            min_samples: defaults::MIN_SAMPLES_FOR_ANOMALY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsdbConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub org: Option<String>,
    pub bucket: Option<String>,
    pub batch_max: usize,
    pub flush_interval_ms: u64,
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            org: None,
            bucket: None,
            batch_max: defaults::TSDB_BATCH_MAX,
            flush_interval_ms: defaults::TSDB_FLUSH_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://gateway.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HvacConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for HvacConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestersConfig {
    pub weather_base_url: Option<String>,
    pub electricity_base_url: Option<String>,
    pub market_base_url: Option<String>,
    pub tourism_base_url: Option<String>,
    pub enabled: bool,
}

impl Default for HarvestersConfig {
    fn default() -> Self {
        Self {
            weather_base_url: None,
            electricity_base_url: None,
            market_base_url: None,
            tourism_base_url: None,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub tsdb: TsdbConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub hvac: HvacConfig,
    #[serde(default)]
    pub harvesters: HarvestersConfig,
    #[serde(default)]
    pub rules_path: Option<String>,
}

impl GatewayConfig {
    /// Load per the documented order, then apply environment variable
    /// overrides listed in the module docs.
    pub fn load() -> Self {
        let path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_string());
        let mut config = Self::from_file(&path).unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    fn from_file(path: impl AsRef<Path>) -> Option<Self> {
        let text = std::fs::read_to_string(path.as_ref()).ok()?;
        match toml::from_str(&text) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.as_ref().display(), "failed to parse config file, using defaults");
                None
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("API_KEY") {
            self.server.api_key = v;
        }
        if let Ok(v) = std::env::var("NOTIFICATION_COOLDOWN") {
            if let Ok(secs) = v.parse() {
                self.notifications.default_cooldown_seconds = secs;
            }
        }
        if let Ok(v) = std::env::var("NTFY_TOPIC") {
            self.notifications.ntfy_topic = Some(v);
        }
        if let Ok(v) = std::env::var("NTFY_URL") {
            self.notifications.ntfy_url = Some(v);
        }
        if let Ok(v) = std::env::var("TWILIO_ACCOUNT_SID") {
            self.notifications.twilio_account_sid = Some(v);
        }
        if let Ok(v) = std::env::var("TWILIO_AUTH_TOKEN") {
            self.notifications.twilio_auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("TWILIO_FROM_NUMBER") {
            self.notifications.twilio_from_number = Some(v);
        }
        if let Ok(v) = std::env::var("TWILIO_TO_NUMBER") {
            self.notifications.twilio_to_number = Some(v);
        }
        if let Ok(v) = std::env::var("WHATSAPP_FROM_NUMBER") {
            self.notifications.whatsapp_from_number = Some(v);
        }
        if let Ok(v) = std::env::var("WHATSAPP_TO_NUMBER") {
            self.notifications.whatsapp_to_number = Some(v);
        }
        if let Ok(v) = std::env::var("SMTP_HOST") {
            self.notifications.smtp_host = Some(v);
        }
        if let Ok(v) = std::env::var("SMTP_PORT") {
            if let Ok(port) = v.parse() {
                self.notifications.smtp_port = Some(port);
            }
        }
        if let Ok(v) = std::env::var("SMTP_USER") {
            self.notifications.smtp_user = Some(v);
        }
        if let Ok(v) = std::env::var("SMTP_PASSWORD") {
            self.notifications.smtp_password = Some(v);
        }
        if let Ok(v) = std::env::var("ALERT_EMAIL_TO") {
            self.notifications.alert_email_to = Some(v);
        }
        if let Ok(v) = std::env::var("TSDB_URL") {
            self.tsdb.url = Some(v);
        }
        if let Ok(v) = std::env::var("TSDB_TOKEN") {
            self.tsdb.token = Some(v);
        }
        if let Ok(v) = std::env::var("TSDB_ORG") {
            self.tsdb.org = Some(v);
        }
        if let Ok(v) = std::env::var("TSDB_BUCKET") {
            self.tsdb.bucket = Some(v);
        }
        if let Ok(v) = std::env::var("HON_BASE_URL") {
            self.hvac.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("HON_API_KEY") {
            self.hvac.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("DB_URL") {
            self.db.url = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_cooldown() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.notifications.default_cooldown_seconds,
            defaults::DEFAULT_COOLDOWN_SECONDS
        );
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("NOTIFICATION_COOLDOWN", "45");
        let mut config = GatewayConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.notifications.default_cooldown_seconds, 45);
        std::env::remove_var("NOTIFICATION_COOLDOWN");
    }
}
