//! Environment-driven configuration. There is no config file search here
//! (unlike the teacher's `ConfigLoader`): every setting is a plain env var,
//! with defaulting and validation happening once at `AppConfig::load_from_env`.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{key} is required")]
    Missing { key: &'static str },
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
    pub use_tls: bool,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub http_host: String,
    pub http_port: u16,
    pub admin_token: String,
    pub rate_limit_rps: u32,
    pub max_body_bytes: usize,
    pub database_url: Option<String>,
    pub trusted_proxies: Vec<String>,

    pub notify_email_enabled: bool,
    pub notify_webhook_enabled: bool,
    pub email: Option<EmailConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl AppConfig {
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Loads and validates configuration from the process environment.
    /// Fails fast: a service that would misbehave at runtime (no admin
    /// token, email enabled with no SMTP host, ...) should never start.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let env_name = getenv_default("APP_ENV", "development");

        let http_host = getenv_default("HTTP_HOST", "0.0.0.0");
        let http_port = int_from_env("HTTP_PORT", 8080)?;

        let admin_token = env::var("ADMIN_TOKEN").unwrap_or_default().trim().to_string();
        if admin_token.is_empty() {
            return Err(ConfigError::Missing { key: "ADMIN_TOKEN" });
        }
        if is_placeholder(&admin_token) && env_name != "development" {
            return Err(ConfigError::Invalid {
                key: "ADMIN_TOKEN",
                reason: "must be a real secret, not a placeholder".into(),
            });
        }

        let rate_limit_rps: u32 = int_from_env("RATE_LIMIT_RPS", 5)?;
        if rate_limit_rps == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_RPS",
                reason: "must be > 0".into(),
            });
        }

        let max_body_bytes: usize = int_from_env("MAX_BODY_BYTES", 65536)?;
        if max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_BODY_BYTES",
                reason: "must be > 0".into(),
            });
        }

        let database_url = nonempty_env("DATABASE_URL");
        let trusted_proxies = nonempty_env("TRUSTED_PROXIES")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let notify_email_enabled = bool_from_env("NOTIFY_EMAIL_ENABLED");
        let notify_webhook_enabled = bool_from_env("NOTIFY_WEBHOOK_ENABLED");

        let email = if notify_email_enabled {
            let host = nonempty_env("SMTP_HOST").ok_or(ConfigError::Missing { key: "SMTP_HOST" })?;
            let port: u16 = int_from_env("SMTP_PORT", 0)?;
            if port == 0 {
                return Err(ConfigError::Missing { key: "SMTP_PORT" });
            }
            let from = nonempty_env("SMTP_FROM").ok_or(ConfigError::Missing { key: "SMTP_FROM" })?;
            let to_csv = nonempty_env("SMTP_TO").ok_or(ConfigError::Missing { key: "SMTP_TO" })?;
            Some(EmailConfig {
                host,
                port,
                username: env::var("SMTP_USERNAME").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                from,
                to: to_csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
                use_tls: bool_from_env("SMTP_USE_TLS"),
            })
        } else {
            None
        };

        let webhook = if notify_webhook_enabled {
            let url = nonempty_env("WEBHOOK_URL").ok_or(ConfigError::Missing { key: "WEBHOOK_URL" })?;
            Some(WebhookConfig {
                url,
                secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(AppConfig {
            env: env_name,
            http_host,
            http_port,
            admin_token,
            rate_limit_rps,
            max_body_bytes,
            database_url,
            trusted_proxies,
            notify_email_enabled,
            notify_webhook_enabled,
            email,
            webhook,
        })
    }
}

fn getenv_default(key: &str, default: &str) -> String {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn nonempty_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn bool_from_env(key: &str) -> bool {
    env::var(key).map(|v| v.trim().to_lowercase() == "true").unwrap_or(false)
}

fn int_from_env<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match nonempty_env(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("{raw:?} is not a valid number"),
        }),
    }
}

fn is_placeholder(s: &str) -> bool {
    let upper = s.trim().to_uppercase();
    upper == "__CHANGE_ME__" || upper.contains("CHANGE_ME")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "APP_ENV", "HTTP_HOST", "HTTP_PORT", "ADMIN_TOKEN", "RATE_LIMIT_RPS", "MAX_BODY_BYTES",
            "DATABASE_URL", "TRUSTED_PROXIES", "NOTIFY_EMAIL_ENABLED", "NOTIFY_WEBHOOK_ENABLED",
            "SMTP_HOST", "SMTP_PORT", "SMTP_FROM", "SMTP_TO", "SMTP_USERNAME", "SMTP_PASSWORD",
            "SMTP_USE_TLS", "WEBHOOK_URL", "WEBHOOK_SECRET",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_admin_token_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = AppConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "ADMIN_TOKEN" }));
    }

    #[test]
    fn placeholder_token_rejected_outside_development() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("APP_ENV", "production");
        env::set_var("ADMIN_TOKEN", "__CHANGE_ME__");
        let err = AppConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ADMIN_TOKEN", .. }));
        clear_env();
    }

    #[test]
    fn placeholder_token_allowed_in_development() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("ADMIN_TOKEN", "__CHANGE_ME__");
        let cfg = AppConfig::load_from_env().unwrap();
        assert_eq!(cfg.env, "development");
        clear_env();
    }

    #[test]
    fn email_enabled_without_smtp_host_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("ADMIN_TOKEN", "real-secret");
        env::set_var("NOTIFY_EMAIL_ENABLED", "true");
        let err = AppConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "SMTP_HOST" }));
        clear_env();
    }

    #[test]
    fn defaults_are_sane() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("ADMIN_TOKEN", "real-secret");
        let cfg = AppConfig::load_from_env().unwrap();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.rate_limit_rps, 5);
        assert_eq!(cfg.max_body_bytes, 65536);
        assert!(!cfg.notify_email_enabled);
        clear_env();
    }
}
