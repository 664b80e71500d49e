use crate::domain::entities::order::OrderTag;
use crate::domain::errors::ConfigError;
use crate::domain::services::pattern_detector::DetectorConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Which venue adapter to build at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueMode {
    /// HTTP bridge in front of a trading terminal
    Bridge,
    /// In-memory simulated venue
    Paper,
}

impl FromStr for VenueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bridge" | "http" => Ok(VenueMode::Bridge),
            "paper" | "demo" => Ok(VenueMode::Paper),
            other => Err(format!("Unknown venue mode: {}", other)),
        }
    }
}

/// Process-level settings read once from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub venue_mode: VenueMode,
    pub venue_bridge_url: String,
    pub venue_timeout_ms: u64, // applied to every venue call

    pub parser_api_key: Option<String>,
    pub parser_model: String,
    pub parser_base_url: String,
    pub parser_timeout_secs: u64,

    pub lot_per_leg: f64, // volume of each take-profit leg
    pub min_lot: f64,

    // Breakeven monitor
    pub breakeven_enabled: bool,
    pub breakeven_offset_pips: f64,
    pub monitor_interval_seconds: u64,
    pub deal_history_days: u32,

    // Order tagging for reconciliation
    pub order_magic: u64,
    pub order_tag_prefix: String,

    // Autonomous detector path
    pub autotrader_enabled: bool,
    pub autotrader_symbols: Vec<String>,
    pub autotrader_interval_seconds: u64,
    pub autotrader_candles: usize,
    pub autotrader_rsi_filter: bool, // skip entries against stretched momentum
    pub min_risk_reward: f64,

    // Risk guard
    pub risk_starting_balance: f64,
    pub risk_daily_loss_fraction: f64,
    pub risk_max_drawdown_fraction: f64,

    pub http_bind_addr: String,
    pub channels_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "sqlite://data/signals.db".to_string(),
            venue_mode: VenueMode::Paper,
            venue_bridge_url: "http://127.0.0.1:8001".to_string(),
            venue_timeout_ms: 10_000,

            parser_api_key: None,
            parser_model: "gemini-1.5-flash".to_string(),
            parser_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            parser_timeout_secs: 20,

            lot_per_leg: 0.01,
            min_lot: 0.01,

            breakeven_enabled: true,
            breakeven_offset_pips: 1.0,
            monitor_interval_seconds: 15,
            deal_history_days: 1,

            order_magic: 770_001,
            order_tag_prefix: "sb".to_string(),

            autotrader_enabled: false,
            autotrader_symbols: vec!["XAUUSD".to_string()],
            autotrader_interval_seconds: 300,
            autotrader_candles: 100,
            autotrader_rsi_filter: false,
            min_risk_reward: 2.0,

            risk_starting_balance: 10_000.0,
            risk_daily_loss_fraction: 0.05,   // 5% of starting balance per day
            risk_max_drawdown_fraction: 0.10, // 10% overall

            http_bind_addr: "127.0.0.1:8080".to_string(),
            channels_file: PathBuf::from("config/channels.json"),
        }
    }
}

/// Read `name` and keep it only if it parses and passes `valid`; otherwise warn and keep the default.
fn env_value<T>(name: &str, current: T, valid: impl Fn(&T) -> bool, rule: &str) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    let raw = match std::env::var(name) {
        Ok(raw) => raw,
        Err(_) => return current,
    };

    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {:?} ({}), using default: {:?}",
                name,
                value,
                rule,
                current
            );
            current
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {:?}",
                name,
                raw,
                e,
                current
            );
            current
        }
    }
}

fn env_flag(name: &str, current: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => value.to_lowercase() == "true" || value == "1",
        Err(_) => current,
    }
}

fn env_string(name: &str, current: String) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(current)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        config.database_url = env_string("DATABASE_URL", config.database_url);

        if let Ok(mode) = std::env::var("VENUE_MODE") {
            match mode.parse::<VenueMode>() {
                Ok(value) => config.venue_mode = value,
                Err(e) => tracing::warn!("{}, using default: {:?}", e, config.venue_mode),
            }
        }
        config.venue_bridge_url = env_string("VENUE_BRIDGE_URL", config.venue_bridge_url);
        config.venue_timeout_ms = env_value(
            "VENUE_TIMEOUT_MS",
            config.venue_timeout_ms,
            |v| (500..=120_000).contains(v),
            "must be between 500 and 120000",
        );

        config.parser_api_key = std::env::var("PARSER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        config.parser_model = env_string("PARSER_MODEL", config.parser_model);
        config.parser_base_url = env_string("PARSER_BASE_URL", config.parser_base_url);
        config.parser_timeout_secs = env_value(
            "PARSER_TIMEOUT_SECS",
            config.parser_timeout_secs,
            |v| (1..=120).contains(v),
            "must be between 1 and 120",
        );

        // Volume is checked against MIN_LOT per signal, so a low lot is kept as-is
        config.lot_per_leg = env_value(
            "LOT_PER_LEG",
            config.lot_per_leg,
            |v| v.is_finite(),
            "must be a number",
        );
        config.min_lot = env_value(
            "MIN_LOT",
            config.min_lot,
            |v| v.is_finite() && *v > 0.0,
            "must be positive",
        );
        if config.lot_per_leg < config.min_lot {
            tracing::warn!(
                "LOT_PER_LEG {} is below MIN_LOT {}: signals will be rejected",
                config.lot_per_leg,
                config.min_lot
            );
        }

        config.breakeven_enabled = env_flag("BREAKEVEN_ENABLED", config.breakeven_enabled);
        config.breakeven_offset_pips = env_value(
            "BREAKEVEN_OFFSET_PIPS",
            config.breakeven_offset_pips,
            |v| (0.0..=100.0).contains(v),
            "must be between 0 and 100",
        );
        config.monitor_interval_seconds = env_value(
            "MONITOR_INTERVAL_SECONDS",
            config.monitor_interval_seconds,
            |v| (1..=600).contains(v),
            "must be between 1 and 600",
        );
        config.deal_history_days = env_value(
            "DEAL_HISTORY_DAYS",
            config.deal_history_days,
            |v| (1..=30).contains(v),
            "must be between 1 and 30",
        );

        config.order_magic = env_value("ORDER_MAGIC", config.order_magic, |v| *v > 0, "must be positive");
        config.order_tag_prefix = env_value(
            "ORDER_TAG_PREFIX",
            config.order_tag_prefix,
            |v: &String| !v.is_empty() && !v.contains(':') && v.len() <= 8,
            "1-8 characters without ':'",
        );

        config.autotrader_enabled = env_flag("AUTOTRADER_ENABLED", config.autotrader_enabled);
        config.autotrader_rsi_filter = env_flag("AUTOTRADER_RSI_FILTER", config.autotrader_rsi_filter);
        if let Ok(symbols) = std::env::var("AUTOTRADER_SYMBOLS") {
            let parsed: Vec<String> = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.autotrader_symbols = parsed;
            }
        }
        config.autotrader_interval_seconds = env_value(
            "AUTOTRADER_INTERVAL_SECONDS",
            config.autotrader_interval_seconds,
            |v| (30..=86_400).contains(v),
            "must be between 30 and 86400",
        );
        config.autotrader_candles = env_value(
            "AUTOTRADER_CANDLES",
            config.autotrader_candles,
            |v| (20..=1000).contains(v),
            "must be between 20 and 1000",
        );
        config.min_risk_reward = env_value(
            "MIN_RISK_REWARD",
            config.min_risk_reward,
            |v| (0.5..=10.0).contains(v),
            "must be between 0.5 and 10",
        );

        config.risk_starting_balance = env_value(
            "RISK_STARTING_BALANCE",
            config.risk_starting_balance,
            |v| v.is_finite() && *v > 0.0,
            "must be positive",
        );
        config.risk_daily_loss_fraction = env_value(
            "RISK_DAILY_LOSS_FRACTION",
            config.risk_daily_loss_fraction,
            |v| *v > 0.0 && *v <= 1.0,
            "must be in (0, 1]",
        );
        config.risk_max_drawdown_fraction = env_value(
            "RISK_MAX_DRAWDOWN_FRACTION",
            config.risk_max_drawdown_fraction,
            |v| *v > 0.0 && *v <= 1.0,
            "must be in (0, 1]",
        );

        config.http_bind_addr = env_string("HTTP_BIND_ADDR", config.http_bind_addr);
        if let Ok(path) = std::env::var("CHANNELS_FILE") {
            if !path.trim().is_empty() {
                config.channels_file = PathBuf::from(path.trim());
            }
        }

        config
    }

    pub fn order_tag(&self) -> OrderTag {
        OrderTag::new(self.order_magic, self.order_tag_prefix.clone())
    }

    pub fn venue_timeout(&self) -> Duration {
        Duration::from_millis(self.venue_timeout_ms)
    }

    pub fn parser_timeout(&self) -> Duration {
        Duration::from_secs(self.parser_timeout_secs)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            min_risk_reward: self.min_risk_reward,
            ..DetectorConfig::default()
        }
    }
}

/// One monitored chat channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub default_symbol: Option<String>,
    /// Used instead of `default_symbol` on Saturday and Sunday
    #[serde(default)]
    pub weekend_symbol: Option<String>,
}

fn default_active() -> bool {
    true
}

/// Channel directory and symbol aliases, loaded from the channels file.
///
/// A snapshot is immutable; reloading produces a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    /// Parsed symbol (uppercase) -> venue symbol
    #[serde(default)]
    pub symbol_aliases: HashMap<String, String>,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut settings: Settings = serde_json::from_str(json)?;
        settings.symbol_aliases = settings
            .symbol_aliases
            .into_iter()
            .map(|(k, v)| (k.trim().to_uppercase(), v.trim().to_string()))
            .collect();
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn channel(&self, channel_id: &str) -> Option<&ChannelConfig> {
        self.channels.get(channel_id)
    }

    pub fn alias_for(&self, symbol: &str) -> Option<&str> {
        self.symbol_aliases
            .get(&symbol.trim().to_uppercase())
            .map(String::as_str)
    }
}

/// Shared access to the current [`Settings`] snapshot
#[derive(Clone)]
pub struct SettingsHandle {
    path: Option<PathBuf>,
    current: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsHandle {
    /// Handle backed by a file; `reload` re-reads it
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = Settings::load(&path)?;
        Ok(Self {
            path: Some(path),
            current: Arc::new(RwLock::new(Arc::new(settings))),
        })
    }

    /// Fixed settings with no backing file
    pub fn fixed(settings: Settings) -> Self {
        Self {
            path: None,
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub async fn snapshot(&self) -> Arc<Settings> {
        self.current.read().await.clone()
    }

    /// Re-read the backing file and swap the snapshot. On error the old snapshot stays.
    pub async fn reload(&self) -> Result<Arc<Settings>, ConfigError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("settings have no backing file".to_string()))?;
        let fresh = Arc::new(Settings::load(path)?);
        *self.current.write().await = fresh.clone();
        tracing::info!(
            "Settings reloaded from {}: {} channels, {} aliases",
            path.display(),
            fresh.channels.len(),
            fresh.symbol_aliases.len()
        );
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"{
        "channels": {
            "-1001": {"name": "Gold Room", "default_symbol": "XAUUSD", "weekend_symbol": "BTCUSD"},
            "-1002": {"name": "Muted", "active": false}
        },
        "symbol_aliases": {"gold": "XAUUSD", "BTC": "BTCUSD"}
    }"#;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.venue_mode, VenueMode::Paper);
        assert!(config.lot_per_leg >= config.min_lot);
        assert_eq!(config.order_tag().comment(3, 1), "sb:3:1");
        assert_eq!(config.detector_config().min_risk_reward, 2.0);
    }

    #[test]
    fn test_venue_mode_parse() {
        assert_eq!("Bridge".parse::<VenueMode>().unwrap(), VenueMode::Bridge);
        assert_eq!("demo".parse::<VenueMode>().unwrap(), VenueMode::Paper);
        assert!("mt5-local".parse::<VenueMode>().is_err());
    }

    #[test]
    fn test_settings_from_json() {
        let settings = Settings::from_json(SETTINGS).unwrap();
        let gold = settings.channel("-1001").unwrap();
        assert!(gold.active);
        assert_eq!(gold.weekend_symbol.as_deref(), Some("BTCUSD"));
        assert!(!settings.channel("-1002").unwrap().active);
        assert!(settings.channel("-9").is_none());

        assert_eq!(settings.alias_for("Gold"), Some("XAUUSD"));
        assert_eq!(settings.alias_for("btc"), Some("BTCUSD"));
        assert_eq!(settings.alias_for("EURUSD"), None);
    }

    #[tokio::test]
    async fn test_reload_swaps_snapshot() {
        let path = std::env::temp_dir().join(format!("signalbridge-settings-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"channels": {}}"#).unwrap();

        let handle = SettingsHandle::from_file(&path).unwrap();
        let before = handle.snapshot().await;
        assert!(before.channels.is_empty());

        std::fs::write(&path, SETTINGS).unwrap();
        handle.reload().await.unwrap();
        assert_eq!(handle.snapshot().await.channels.len(), 2);
        // Old snapshot is untouched
        assert!(before.channels.is_empty());

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(handle.reload().await, Err(ConfigError::Parse { .. })));
        assert_eq!(handle.snapshot().await.channels.len(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_fixed_settings_cannot_reload() {
        let handle = SettingsHandle::fixed(Settings::default());
        assert!(handle.reload().await.is_err());
    }
}
