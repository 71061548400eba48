//! Client Configuration Settings
//!
//! Configuration types for the KIS quote client, loaded from environment
//! variables. [`KisConfig::from_lookup`] takes any key lookup so the parsing
//! rules can be exercised without touching the process environment.

use std::path::PathBuf;
use std::time::Duration;

/// KIS trading environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Virtual (paper) trading servers.
    #[default]
    Virtual,
    /// Real trading servers.
    Real,
}

impl Environment {
    /// Parse the `KIS_IS_VIRTUAL` flag. Anything other than an explicit
    /// false value selects the virtual environment.
    #[must_use]
    pub fn from_virtual_flag(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "false" | "0" | "no" => Self::Real,
            _ => Self::Virtual,
        }
    }

    /// Check if this is the virtual environment.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::Real => "real",
        }
    }

    /// Default REST base URL.
    #[must_use]
    pub const fn rest_base_url(&self) -> &'static str {
        match self {
            Self::Virtual => "https://openapivts.koreainvestment.com:29443",
            Self::Real => "https://openapi.koreainvestment.com:9443",
        }
    }

    /// Default WebSocket URL.
    #[must_use]
    pub const fn ws_url(&self) -> &'static str {
        match self {
            Self::Virtual => "ws://ops.koreainvestment.com:31000/tryitout/H0STCNT0",
            Self::Real => "ws://ops.koreainvestment.com:21000/tryitout/H0STCNT0",
        }
    }
}

/// KIS app credentials.
#[derive(Clone)]
pub struct Credentials {
    app_key: String,
    app_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(app_key: String, app_secret: String) -> Self {
        Self {
            app_key,
            app_secret,
        }
    }

    /// Get the app key.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Get the app secret.
    #[must_use]
    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &"[REDACTED]")
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

/// Brokerage account number, split into the 8-digit account (`CANO`) and
/// the 2-digit product code.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountNumber {
    cano: String,
    product_code: String,
}

impl AccountNumber {
    /// Parse `12345678-01` or `1234567801`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAccountNumber`] for anything that is
    /// not ten digits with an optional dash after the eighth.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let digits: String = raw.trim().chars().filter(|c| *c != '-').collect();
        let dash_ok = match raw.trim().find('-') {
            None => true,
            Some(pos) => pos == 8 && raw.trim().matches('-').count() == 1,
        };
        if !dash_ok || digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidAccountNumber);
        }
        let (cano, product_code) = digits.split_at(8);
        Ok(Self {
            cano: cano.to_string(),
            product_code: product_code.to_string(),
        })
    }

    /// The 8-digit account number.
    #[must_use]
    pub fn cano(&self) -> &str {
        &self.cano
    }

    /// The 2-digit product code.
    #[must_use]
    pub fn product_code(&self) -> &str {
        &self.product_code
    }
}

impl std::fmt::Debug for AccountNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountNumber")
            .field("cano", &"[REDACTED]")
            .field("product_code", &self.product_code)
            .finish()
    }
}

/// REST client settings.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// REST base URL.
    pub base_url: String,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Total request timeout.
    pub timeout: Duration,
}

impl HttpSettings {
    fn for_environment(environment: Environment) -> Self {
        Self {
            base_url: environment.rest_base_url().to_string(),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket URL.
    pub url: String,
    /// Also stream the 10-level order book.
    pub order_book: bool,
    /// WebSocket ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after which the session is considered dead.
    pub idle_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum consecutive reconnection attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl StreamSettings {
    fn for_environment(environment: Environment) -> Self {
        Self {
            url: environment.ws_url().to_string(),
            order_book: false,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct KisConfig {
    /// Trading environment.
    pub environment: Environment,
    /// App credentials.
    pub credentials: Credentials,
    /// Brokerage account.
    pub account: AccountNumber,
    /// Token cache file shared across processes.
    pub token_cache_path: PathBuf,
    /// Symbols the binary subscribes to at startup.
    pub symbols: Vec<String>,
    /// REST client settings.
    pub http: HttpSettings,
    /// Streaming settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl KisConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing,
    /// empty, or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required keys are missing, empty, or malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let app_key = env.required("KIS_APP_KEY")?;
        let app_secret = env.required("KIS_APP_SECRET")?;
        let account = AccountNumber::parse(&env.required("KIS_ACCOUNT_NO")?)?;

        let environment = env
            .get("KIS_IS_VIRTUAL")
            .map(|s| Environment::from_virtual_flag(&s))
            .unwrap_or_default();

        let token_cache_path = env
            .get("KIS_TOKEN_CACHE_PATH")
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| PathBuf::from("token.json"), PathBuf::from);

        let symbols = parse_symbols(env.get("KIS_SYMBOLS").as_deref().unwrap_or("005930"));

        let http_defaults = HttpSettings::for_environment(environment);
        let http = HttpSettings {
            base_url: env
                .get("KIS_REST_BASE_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(http_defaults.base_url),
            connect_timeout: env.duration_secs(
                "KIS_HTTP_CONNECT_TIMEOUT_SECS",
                http_defaults.connect_timeout,
            ),
            timeout: env.duration_secs("KIS_HTTP_TIMEOUT_SECS", http_defaults.timeout),
        };

        let stream_defaults = StreamSettings::for_environment(environment);
        let stream = StreamSettings {
            url: env
                .get("KIS_WS_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(stream_defaults.url),
            order_book: env.bool("KIS_STREAM_ORDER_BOOK", stream_defaults.order_book),
            heartbeat_interval: env.positive_duration_secs(
                "KIS_HEARTBEAT_INTERVAL_SECS",
                stream_defaults.heartbeat_interval,
            )?,
            idle_timeout: env
                .positive_duration_secs("KIS_IDLE_TIMEOUT_SECS", stream_defaults.idle_timeout)?,
            reconnect_delay_initial: env.duration_millis(
                "KIS_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "KIS_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parsed(
                "KIS_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parsed(
                "KIS_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: env.parsed("KIS_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            environment,
            credentials: Credentials::new(app_key, app_secret),
            account,
            token_cache_path,
            symbols,
            http,
            stream,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Account number is not in `12345678-01` form.
    #[error("KIS_ACCOUNT_NO must be 10 digits, optionally written as 12345678-01")]
    InvalidAccountNumber,
    /// Environment variable is set to a value outside its allowed range.
    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value as read.
        value: String,
        /// What the value must satisfy.
        reason: &'static str,
    },
}

fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    symbols
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn positive_duration_secs(
        &self,
        key: &str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        let value = self.duration_secs(key, default);
        if value.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: self.get(key).unwrap_or_default(),
                reason: "must be at least one second",
            });
        }
        Ok(value)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
