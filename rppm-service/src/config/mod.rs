use secrecy::SecretString;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_REQUESTS_PER_WINDOW: u32 = 5;
const DEFAULT_WINDOW_DURATION_SECONDS: u64 = 60;
const DEFAULT_DAILY_QUOTA_LIMIT: u32 = 100;
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct RppmConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub gate: GateConfig,
    pub auth: AuthConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub completion: CompletionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" | "test" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("Unknown ENVIRONMENT '{}'", other)),
        }
    }
}

/// How strictly the service protects itself, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Credential store configured, every admission check applies.
    Enforced,
    /// No credential store: access codes are accepted unverified and every
    /// authentication response says so. Rate limit and quota still apply.
    Unconfigured,
    /// Admission checks switched off by the operator.
    Disabled,
}

impl OperatingMode {
    pub fn gate_enforced(self) -> bool {
        !matches!(self, OperatingMode::Disabled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Enforced => "enforced",
            OperatingMode::Unconfigured => "unconfigured",
            OperatingMode::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub disabled: bool,
    pub owner_api_key: Option<SecretString>,
    pub owner_ips: Vec<IpAddr>,
    pub max_requests_per_window: u32,
    pub window_duration_seconds: u64,
    pub daily_quota_limit: u32,
    pub upstream_timeout_ms: u64,
    pub retry_credit_ttl_seconds: u64,
    pub trust_proxy_headers: bool,
}

impl GateConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_duration_seconds)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn retry_credit_ttl(&self) -> Duration {
        Duration::from_secs(self.retry_credit_ttl_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub allow_weak_device_ids: bool,
    pub attempts_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Mock,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(format!("Unknown COMPLETION_PROVIDER '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub provider: ProviderKind,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub primary_model: String,
    pub fallback_model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl RppmConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup (the process
    /// environment in production, a map in tests).
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvVars { lookup };

        let environment: Environment = vars
            .get("ENVIRONMENT", Some("dev"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let owner_ips = vars
            .optional("OWNER_IPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<IpAddr>().map_err(|e| {
                            AppError::ConfigError(anyhow::anyhow!("OWNER_IPS entry '{}': {}", s, e))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let database = match vars.optional("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: vars.parse("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                acquire_timeout_secs: vars.parse("DATABASE_ACQUIRE_TIMEOUT_SECONDS", "10", false)?,
            }),
            None if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production but not set"
                )));
            }
            None => None,
        };

        let provider: ProviderKind = vars
            .get("COMPLETION_PROVIDER", Some("gemini"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let api_key = match provider {
            ProviderKind::Gemini => Some(SecretString::new(vars.get("GEMINI_API_KEY", None, is_prod)?)),
            ProviderKind::Mock => vars.optional("GEMINI_API_KEY").map(SecretString::new),
        };

        let config = RppmConfig {
            common,
            environment,
            service_name: vars.get("SERVICE_NAME", Some("rppm-service"), false)?,
            log_level: vars.get("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: vars.optional("OTLP_ENDPOINT"),
            gate: GateConfig {
                disabled: vars.parse("GATE_DISABLED", "false", false)?,
                owner_api_key: vars.optional("OWNER_API_KEY").map(SecretString::new),
                owner_ips,
                max_requests_per_window: vars.parse(
                    "MAX_REQUESTS_PER_WINDOW",
                    &DEFAULT_MAX_REQUESTS_PER_WINDOW.to_string(),
                    false,
                )?,
                window_duration_seconds: vars.parse(
                    "WINDOW_DURATION_SECONDS",
                    &DEFAULT_WINDOW_DURATION_SECONDS.to_string(),
                    false,
                )?,
                daily_quota_limit: vars.parse(
                    "DAILY_QUOTA_LIMIT",
                    &DEFAULT_DAILY_QUOTA_LIMIT.to_string(),
                    false,
                )?,
                upstream_timeout_ms: vars.parse(
                    "UPSTREAM_TIMEOUT_MS",
                    &DEFAULT_UPSTREAM_TIMEOUT_MS.to_string(),
                    false,
                )?,
                retry_credit_ttl_seconds: vars.parse("RETRY_CREDIT_TTL_SECONDS", "600", false)?,
                trust_proxy_headers: vars.parse("TRUST_PROXY_HEADERS", "false", false)?,
            },
            auth: AuthConfig {
                allow_weak_device_ids: vars.parse("ALLOW_WEAK_DEVICE_IDS", "true", false)?,
                attempts_per_minute: vars.parse("AUTH_ATTEMPTS_PER_MINUTE", "10", false)?,
            },
            database,
            redis: vars.optional("REDIS_URL").map(|url| RedisConfig { url }),
            completion: CompletionConfig {
                provider,
                api_key,
                base_url: vars.get(
                    "GEMINI_BASE_URL",
                    Some("https://generativelanguage.googleapis.com/v1beta"),
                    false,
                )?,
                primary_model: vars.get("PRIMARY_MODEL", Some("gemini-2.5-flash"), false)?,
                fallback_model: Some(vars.get("FALLBACK_MODEL", Some("gemini-2.0-flash"), false)?)
                    .filter(|m| !m.is_empty() && m != "none"),
            },
            security: SecurityConfig {
                allowed_origins: vars
                    .get("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Operating mode derived from configuration; computed once and threaded
    /// through the gate and authenticator.
    pub fn operating_mode(&self) -> OperatingMode {
        if self.gate.disabled {
            OperatingMode::Disabled
        } else if self.database.is_none() {
            OperatingMode::Unconfigured
        } else {
            OperatingMode::Enforced
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.gate.max_requests_per_window == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAX_REQUESTS_PER_WINDOW must be at least 1"
            )));
        }
        if self.gate.window_duration_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "WINDOW_DURATION_SECONDS must be at least 1"
            )));
        }
        if self.gate.upstream_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "UPSTREAM_TIMEOUT_MS must be at least 1"
            )));
        }
        if self.environment == Environment::Prod && self.completion.provider == ProviderKind::Mock {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "COMPLETION_PROVIDER=mock is not allowed in production"
            )));
        }
        Ok(())
    }
}

struct EnvVars<F> {
    lookup: F,
}

impl<F> EnvVars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get(&self, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
        match self.optional(key) {
            Some(val) => Ok(val),
            None => {
                if is_prod {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required but not set",
                        key
                    )))
                }
            }
        }
    }

    fn parse<T>(&self, key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key, Some(default), is_prod)?
            .parse()
            .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
    }
}

/// Convenience for tests and tooling: build from a map of variables.
pub fn config_from_map(vars: &HashMap<&str, &str>) -> Result<RppmConfig, AppError> {
    RppmConfig::from_lookup(core_config::Config::default(), |key| {
        vars.get(key).map(|v| v.to_string())
    })
}
