use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_AMOUNT_TOLERANCE_MINOR: i64 = 1;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_INITIATE: u32 = 30;
const DEFAULT_RATE_LIMIT_COMPLETE: u32 = 60;
const DEFAULT_RATE_LIMIT_MERCHANT: u32 = 30;
const DEFAULT_FRAUD_MAX_FAILED_ATTEMPTS: usize = 10;
const DEFAULT_FRAUD_WINDOW_SECS: u64 = 900;
const DEFAULT_FREE_SHIPPING_THRESHOLD_MINOR: i64 = 10_000;
const DEFAULT_SHIPPING_STANDARD_MINOR: i64 = 300;
const DEFAULT_SHIPPING_EXPRESS_MINOR: i64 = 1_500;
const DEFAULT_TAX_DOMESTIC_BPS: i64 = 1_000;
const DEFAULT_TAX_REGIONAL_BPS: i64 = 650;
const DEFAULT_TAX_INTERNATIONAL_BPS: i64 = 0;
const DEFAULT_HOME_COUNTRY: &str = "US";
const DEFAULT_REGIONAL_COUNTRIES: &str = "CA,MX";
const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_PAYPAL_BASE_URL: &str = "https://www.sandbox.paypal.com";
const DEFAULT_APPLE_NETWORK_DOMAINS: &str = "apple.com";

/// Application configuration with validation.
///
/// Sources are layered: `config/default`, `config/{environment}`, then
/// `APP_`-prefixed environment variables, last wins.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment ("development", "production", ...)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// ISO 4217 currency code all amounts are denominated in (minor units)
    #[validate(length(equal = 3))]
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Allowed difference between the client-declared and server-computed
    /// order total, in minor units
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance_minor: i64,

    /// Timeout for any single outbound gateway call, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Rate limiting: window size (seconds), shared by all endpoint classes
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    /// Rate limiting: initiate requests per window per client
    #[serde(default = "default_rate_limit_initiate")]
    pub rate_limit_initiate_per_window: u32,
    /// Rate limiting: complete/return requests per window per client
    #[serde(default = "default_rate_limit_complete")]
    pub rate_limit_complete_per_window: u32,
    /// Rate limiting: merchant-validation requests per window per client
    #[serde(default = "default_rate_limit_merchant")]
    pub rate_limit_merchant_per_window: u32,

    /// Fraud guard: failed attempts per client before initiate is refused
    #[serde(default = "default_fraud_max_failed_attempts")]
    pub fraud_max_failed_attempts: usize,
    /// Fraud guard: lookback window (seconds)
    #[serde(default = "default_fraud_window_secs")]
    pub fraud_window_secs: u64,

    /// Subtotal (minor units) at which shipping becomes free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold_minor: i64,
    /// Flat rate for the "standard" shipping option (minor units)
    #[serde(default = "default_shipping_standard")]
    pub shipping_standard_minor: i64,
    /// Flat rate for the "express" shipping option (minor units)
    #[serde(default = "default_shipping_express")]
    pub shipping_express_minor: i64,

    /// Tax rates in basis points, selected by destination zone
    #[serde(default = "default_tax_domestic_bps")]
    pub tax_domestic_bps: i64,
    #[serde(default = "default_tax_regional_bps")]
    pub tax_regional_bps: i64,
    #[serde(default = "default_tax_international_bps")]
    pub tax_international_bps: i64,

    /// Country the marketplace ships from; same-country orders are "domestic"
    #[validate(length(equal = 2))]
    #[serde(default = "default_home_country")]
    pub home_country: String,
    /// Comma-separated country codes treated as the "regional" zone
    #[serde(default = "default_regional_countries")]
    pub regional_countries: String,

    /// Base URL the redirect flow sends buyers back to after payment
    #[serde(default = "default_frontend_base_url")]
    pub frontend_base_url: String,

    /// Redirect gateway approval base URL (sandbox by default)
    #[serde(default = "default_paypal_base_url")]
    pub paypal_base_url: String,

    /// Device-attested gateway merchant identity; both must be set for the
    /// merchant-validation endpoint to be enabled
    #[serde(default)]
    pub apple_merchant_id: Option<String>,
    #[serde(default)]
    pub apple_merchant_domain: Option<String>,
    /// Display name sent with the merchant session request
    #[serde(default = "default_apple_display_name")]
    pub apple_display_name: String,
    /// Comma-separated domain suffixes a validation URL may belong to
    #[serde(default = "default_apple_network_domains")]
    pub apple_network_domains: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn regional_country_list(&self) -> Vec<String> {
        split_csv(&self.regional_countries)
    }

    pub fn apple_network_domain_list(&self) -> Vec<String> {
        split_csv(&self.apple_network_domains)
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            currency: default_currency(),
            amount_tolerance_minor: default_amount_tolerance(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_initiate_per_window: default_rate_limit_initiate(),
            rate_limit_complete_per_window: default_rate_limit_complete(),
            rate_limit_merchant_per_window: default_rate_limit_merchant(),
            fraud_max_failed_attempts: default_fraud_max_failed_attempts(),
            fraud_window_secs: default_fraud_window_secs(),
            free_shipping_threshold_minor: default_free_shipping_threshold(),
            shipping_standard_minor: default_shipping_standard(),
            shipping_express_minor: default_shipping_express(),
            tax_domestic_bps: default_tax_domestic_bps(),
            tax_regional_bps: default_tax_regional_bps(),
            tax_international_bps: default_tax_international_bps(),
            home_country: default_home_country(),
            regional_countries: default_regional_countries(),
            frontend_base_url: default_frontend_base_url(),
            paypal_base_url: default_paypal_base_url(),
            apple_merchant_id: None,
            apple_merchant_domain: None,
            apple_display_name: default_apple_display_name(),
            apple_network_domains: default_apple_network_domains(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_amount_tolerance() -> i64 {
    DEFAULT_AMOUNT_TOLERANCE_MINOR
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}
fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}
fn default_rate_limit_initiate() -> u32 {
    DEFAULT_RATE_LIMIT_INITIATE
}
fn default_rate_limit_complete() -> u32 {
    DEFAULT_RATE_LIMIT_COMPLETE
}
fn default_rate_limit_merchant() -> u32 {
    DEFAULT_RATE_LIMIT_MERCHANT
}
fn default_fraud_max_failed_attempts() -> usize {
    DEFAULT_FRAUD_MAX_FAILED_ATTEMPTS
}
fn default_fraud_window_secs() -> u64 {
    DEFAULT_FRAUD_WINDOW_SECS
}
fn default_free_shipping_threshold() -> i64 {
    DEFAULT_FREE_SHIPPING_THRESHOLD_MINOR
}
fn default_shipping_standard() -> i64 {
    DEFAULT_SHIPPING_STANDARD_MINOR
}
fn default_shipping_express() -> i64 {
    DEFAULT_SHIPPING_EXPRESS_MINOR
}
fn default_tax_domestic_bps() -> i64 {
    DEFAULT_TAX_DOMESTIC_BPS
}
fn default_tax_regional_bps() -> i64 {
    DEFAULT_TAX_REGIONAL_BPS
}
fn default_tax_international_bps() -> i64 {
    DEFAULT_TAX_INTERNATIONAL_BPS
}
fn default_home_country() -> String {
    DEFAULT_HOME_COUNTRY.to_string()
}
fn default_regional_countries() -> String {
    DEFAULT_REGIONAL_COUNTRIES.to_string()
}
fn default_frontend_base_url() -> String {
    DEFAULT_FRONTEND_BASE_URL.to_string()
}
fn default_paypal_base_url() -> String {
    DEFAULT_PAYPAL_BASE_URL.to_string()
}
fn default_apple_display_name() -> String {
    "Marketplace".to_string()
}
fn default_apple_network_domains() -> String {
    DEFAULT_APPLE_NETWORK_DOMAINS.to_string()
}

/// Loads configuration from layered sources and validates it.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
