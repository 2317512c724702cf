use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub evm: EvmConfig,
    #[serde(default)]
    pub btc: BtcConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Blocks per sync call (also the cold-start look-back)
    #[serde(default = "default_evm_batch_size")]
    pub batch_size: u64,
    /// Symbol recorded for native-value transfers
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    #[serde(default = "default_decimals")]
    pub native_decimals: u32,
    /// Exponent applied to every ERC-20 amount (no per-token lookup)
    #[serde(default = "default_decimals")]
    pub token_decimals: u32,
}

fn default_evm_batch_size() -> u64 {
    10
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

fn default_decimals() -> u32 {
    18
}

/// Which Bitcoin backend to talk to. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum BtcMode {
    /// Own full node over JSON-RPC
    #[serde(rename = "CORE_RPC", alias = "core_rpc")]
    #[default]
    CoreRpc,
    /// Third-party Esplora-style REST indexer
    #[serde(rename = "EXPLORER", alias = "explorer")]
    Explorer,
}

impl BtcMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BtcMode::CoreRpc => "CORE_RPC",
            BtcMode::Explorer => "EXPLORER",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: BtcMode,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: String,
    #[serde(default)]
    pub rpc_pass: String,
    #[serde(default)]
    pub explorer_base_url: String,
    #[serde(default)]
    pub explorer_api_key: Option<String>,
    /// Smaller than EVM: every input costs an extra lookup
    #[serde(default = "default_btc_batch_size")]
    pub batch_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_btc_batch_size() -> u64 {
    5
}

impl Default for BtcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: BtcMode::CoreRpc,
            rpc_url: String::new(),
            rpc_user: String::new(),
            rpc_pass: String::new(),
            explorer_base_url: String::new(),
            explorer_api_key: None,
            batch_size: default_btc_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout for every chain backend call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyConfig {
    /// Trailing window of buckets used for the baseline
    #[serde(default = "default_baseline_days")]
    pub baseline_days: i64,
    /// Absolute z-score that raises an alert
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
}

fn default_baseline_days() -> i64 {
    30
}

fn default_z_threshold() -> f64 {
    3.0
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            baseline_days: default_baseline_days(),
            z_threshold: default_z_threshold(),
        }
    }
}

/// Intervals used by `exflow run`
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_evm_sync_secs")]
    pub evm_sync_secs: u64,
    #[serde(default = "default_btc_sync_secs")]
    pub btc_sync_secs: u64,
    #[serde(default = "default_five_minutes")]
    pub aggregate_secs: u64,
    #[serde(default = "default_five_minutes")]
    pub alerts_secs: u64,
}

fn default_evm_sync_secs() -> u64 {
    30
}

fn default_btc_sync_secs() -> u64 {
    60
}

fn default_five_minutes() -> u64 {
    300
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            evm_sync_secs: default_evm_sync_secs(),
            btc_sync_secs: default_btc_sync_secs(),
            aggregate_secs: default_five_minutes(),
            alerts_secs: default_five_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Self::with_defaults(Config::builder())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("EXFLOW_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (EXFLOW_EVM__RPC_URL, etc.)
            .add_source(Self::environment(None));

        builder.build()?.try_deserialize()
    }

    /// `EXFLOW_<SECTION>__<KEY>` overrides, read from `vars` instead of the
    /// process environment when given
    fn environment(vars: Option<config::Map<String, String>>) -> Environment {
        Environment::with_prefix("EXFLOW")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(vars)
    }

    /// Parse a TOML document on top of the built-in defaults
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::with_defaults(Config::builder())?
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("http.timeout_secs", 30)?
            .set_default("btc.mode", "CORE_RPC")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if let Err(e) = url::Url::parse(&self.evm.rpc_url) {
            errors.push(format!("evm.rpc_url is not a valid URL: {}", e));
        }
        if self.evm.batch_size == 0 {
            errors.push("evm.batch_size must be positive".to_string());
        }
        if self.evm.native_decimals > 28 || self.evm.token_decimals > 28 {
            errors.push("evm decimals must be at most 28".to_string());
        }

        if self.btc.enabled {
            let (field, value) = match self.btc.mode {
                BtcMode::CoreRpc => ("btc.rpc_url", &self.btc.rpc_url),
                BtcMode::Explorer => ("btc.explorer_base_url", &self.btc.explorer_base_url),
            };
            if let Err(e) = url::Url::parse(value) {
                errors.push(format!(
                    "{} is required for BTC mode {}: {}",
                    field,
                    self.btc.mode.as_str(),
                    e
                ));
            }
            if self.btc.batch_size == 0 {
                errors.push("btc.batch_size must be positive".to_string());
            }
        }

        if self.anomaly.baseline_days <= 0 {
            errors.push("anomaly.baseline_days must be positive".to_string());
        }
        if self.anomaly.z_threshold.is_nan() || self.anomaly.z_threshold <= 0.0 {
            errors.push("anomaly.z_threshold must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [database]
        url = "postgres://localhost/exflow"

        [evm]
        rpc_url = "http://localhost:8545"

        [btc]
        rpc_url = "http://localhost:8332"
    "#;

    #[test]
    fn defaults_fill_in_missing_sections() {
        let cfg = AppConfig::from_toml(MINIMAL).expect("minimal config should parse");
        assert_eq!(cfg.evm.batch_size, 10);
        assert_eq!(cfg.btc.batch_size, 5);
        assert_eq!(cfg.btc.mode, BtcMode::CoreRpc);
        assert_eq!(cfg.evm.native_symbol, "ETH");
        assert_eq!(cfg.anomaly.baseline_days, 30);
        assert_eq!(cfg.schedule.evm_sync_secs, 30);
        assert_eq!(cfg.http.timeout_secs, 30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_btc_mode_is_rejected_at_load() {
        let doc = format!("{}\nmode = \"ELECTRUM\"\n", MINIMAL);
        assert!(AppConfig::from_toml(&doc).is_err());
    }

    #[test]
    fn explorer_mode_requires_base_url() {
        let doc = r#"
            [database]
            url = "postgres://localhost/exflow"

            [evm]
            rpc_url = "http://localhost:8545"

            [btc]
            mode = "EXPLORER"
        "#;
        let cfg = AppConfig::from_toml(doc).expect("should parse");
        assert_eq!(cfg.btc.mode, BtcMode::Explorer);
        let errors = cfg.validate().expect_err("missing explorer url must fail validation");
        assert!(errors.iter().any(|e| e.contains("btc.explorer_base_url")));
    }

    #[test]
    fn disabled_btc_skips_backend_validation() {
        let doc = r#"
            [database]
            url = "postgres://localhost/exflow"

            [evm]
            rpc_url = "http://localhost:8545"

            [btc]
            enabled = false
        "#;
        let cfg = AppConfig::from_toml(doc).expect("should parse");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_use_single_underscore_after_prefix() {
        let vars: config::Map<String, String> = [
            ("EXFLOW_EVM__RPC_URL", "http://node-override:8545"),
            ("EXFLOW_DATABASE__URL", "postgres://db-override/exflow"),
            ("EXFLOW_EVM__BATCH_SIZE", "25"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cfg: AppConfig = AppConfig::with_defaults(Config::builder())
            .unwrap()
            .add_source(File::from_str(MINIMAL, FileFormat::Toml))
            .add_source(AppConfig::environment(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.evm.rpc_url, "http://node-override:8545");
        assert_eq!(cfg.database.url, "postgres://db-override/exflow");
        assert_eq!(cfg.evm.batch_size, 25);
        assert_eq!(cfg.btc.rpc_url, "http://localhost:8332");
    }
}
