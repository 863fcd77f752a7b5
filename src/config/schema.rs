use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mvno.toml";

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Environment ──────────────────────────────────────────────────

/// Deployment environment. Only non-production environments may relax TLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Development,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" | "stage" => Ok(Self::Staging),
            "development" | "dev" | "local" => Ok(Self::Development),
            other => Err(ConfigError::Invalid(format!(
                "unknown environment '{other}'. Supported values: production, staging, development"
            ))),
        }
    }
}

// ── Sections ─────────────────────────────────────────────────────

/// Credentials and endpoints for the Widely MVNO API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WidelyConfig {
    /// Brand-level secret, first stage of the auth digest.
    pub brand_token: String,
    /// Brand identifier sent with subscriber searches.
    pub brand_id: Option<i64>,
    /// Account-level secret, second stage of the auth digest.
    pub account_token: String,
    /// Account identifier sent with account-scoped calls.
    pub account_id: Option<i64>,
    /// Operator identifier carried in every auth triple.
    pub auth_id: Option<i64>,
    /// Endpoint for account-scoped actions (provisioning, packages).
    pub account_action_url: String,
    /// Endpoint for subscriber reads.
    pub app_action_url: String,
    /// Skip TLS certificate validation. Rejected in production.
    pub insecure_tls: bool,
    /// Per-request timeout for upstream calls.
    pub request_timeout_secs: u64,
    /// TCP connect timeout for upstream calls.
    pub connect_timeout_secs: u64,
}

/// Nightly auto-cancel job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the recurring loop runs under `serve`.
    pub enabled: bool,
    /// Six-field cron expression (sec min hour dom mon dow).
    pub cron: String,
    /// IANA timezone the cron expression is evaluated in.
    pub timezone: String,
    /// Pause between terminations, keeps the job under upstream rate limits.
    pub item_delay_ms: u64,
    /// Upper bound for a whole run; unreached lines are reported as failed.
    pub run_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 0 2 * * *".into(),
            timezone: "Asia/Jerusalem".into(),
            item_delay_ms: 1_000,
            run_timeout_secs: 3_600,
        }
    }
}

/// Internal HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8088,
        }
    }
}

/// Local line/device store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("backoffice.db"),
        }
    }
}

// ── Root ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub widely: WidelyConfig,
    pub scheduler: SchedulerConfig,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Load from a TOML file (if present), apply env overrides, validate.
    ///
    /// An explicit `path` must exist; the default file is optional so a
    /// fully env-driven deployment works without one.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = if required || path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Overlay environment values onto the loaded file. Env wins; blank
    /// values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_i64 = |key: &str| -> Result<Option<i64>, ConfigError> {
            get(key)
                .map(|v| {
                    v.parse::<i64>()
                        .map_err(|_| ConfigError::Invalid(format!("{key} must be an integer")))
                })
                .transpose()
        };

        if let Some(v) = get("MVNO_ENV") {
            self.environment = v.parse()?;
        }
        if let Some(v) = get("WIDELY_BRAND_TOKEN") {
            self.widely.brand_token = v;
        }
        if let Some(v) = get_i64("WIDELY_BRAND_ID")? {
            self.widely.brand_id = Some(v);
        }
        if let Some(v) = get("WIDELY_ACCOUNT_TOKEN") {
            self.widely.account_token = v;
        }
        if let Some(v) = get_i64("WIDELY_ACCOUNT_ID")? {
            self.widely.account_id = Some(v);
        }
        if let Some(v) = get_i64("WIDELY_AUTH_ID")? {
            self.widely.auth_id = Some(v);
        }
        if let Some(v) = get("WIDELY_ACCOUNT_ACTION_URL") {
            self.widely.account_action_url = v;
        }
        if let Some(v) = get("WIDELY_APP_ACTION_URL") {
            self.widely.app_action_url = v;
        }
        Ok(())
    }

    /// Startup validation. Reports every missing Widely field at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.widely;
        let mut missing = Vec::new();
        if w.brand_token.trim().is_empty() {
            missing.push("widely.brand_token");
        }
        if w.brand_id.is_none() {
            missing.push("widely.brand_id");
        }
        if w.account_token.trim().is_empty() {
            missing.push("widely.account_token");
        }
        if w.account_id.is_none() {
            missing.push("widely.account_id");
        }
        if w.auth_id.is_none() {
            missing.push("widely.auth_id");
        }
        if w.account_action_url.trim().is_empty() {
            missing.push("widely.account_action_url");
        }
        if w.app_action_url.trim().is_empty() {
            missing.push("widely.app_action_url");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(
                missing.into_iter().map(String::from).collect(),
            ));
        }

        if w.insecure_tls && self.environment.is_production() {
            return Err(ConfigError::Invalid(
                "widely.insecure_tls cannot be enabled when environment = production".into(),
            ));
        }
        if self.scheduler.cron.trim().is_empty() {
            return Err(ConfigError::Invalid("scheduler.cron cannot be empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout_secs(&self) -> u64 {
        if self.widely.request_timeout_secs == 0 {
            30
        } else {
            self.widely.request_timeout_secs
        }
    }

    pub fn connect_timeout_secs(&self) -> u64 {
        if self.widely.connect_timeout_secs == 0 {
            10
        } else {
            self.widely.connect_timeout_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete_toml() -> &'static str {
        r#"
environment = "staging"

[widely]
brand_token = "brand-secret"
brand_id = 12
account_token = "account-secret"
account_id = 34
auth_id = 56
account_action_url = "https://widely.example/account"
app_action_url = "https://widely.example/app"
"#
    }

    #[test]
    fn parses_complete_file() {
        let config = Config::from_toml_str(complete_toml()).unwrap();
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.widely.account_id, Some(34));
        assert_eq!(config.scheduler.cron, "0 0 2 * * *");
        assert_eq!(config.scheduler.timezone, "Asia/Jerusalem");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_lists_every_missing_field() {
        let err = Config::default().validate().unwrap_err();
        let msg = err.to_string();
        for key in [
            "widely.brand_token",
            "widely.brand_id",
            "widely.account_token",
            "widely.account_id",
            "widely.auth_id",
            "widely.account_action_url",
            "widely.app_action_url",
        ] {
            assert!(msg.contains(key), "{key} missing from: {msg}");
        }
    }

    #[test]
    fn insecure_tls_rejected_in_production() {
        let mut config = Config::from_toml_str(complete_toml()).unwrap();
        config.environment = Environment::Production;
        config.widely.insecure_tls = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("insecure_tls"));

        config.environment = Environment::Development;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let mut config = Config::from_toml_str(complete_toml()).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("WIDELY_ACCOUNT_ID", "99"),
            ("WIDELY_BRAND_TOKEN", "   "),
            ("MVNO_ENV", "dev"),
        ]);
        config
            .apply_env_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.widely.account_id, Some(99));
        assert_eq!(config.widely.brand_token, "brand-secret");
        assert_eq!(config.environment, Environment::Development);
    }

    #[test]
    fn env_override_rejects_non_numeric_ids() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(|k| (k == "WIDELY_AUTH_ID").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WIDELY_AUTH_ID"));
    }

    #[test]
    fn load_missing_explicit_file_errors() {
        let err = Config::load(Some(Path::new("/nonexistent/mvno.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn timeouts_fall_back_to_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout_secs(), 30);
        assert_eq!(config.connect_timeout_secs(), 10);
    }
}
