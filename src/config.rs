//! Configuration types, loaded once from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_FOLDER: &str = "INBOX";
const DEFAULT_ATTACHMENT_MIME: &str = "application/pdf";
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Mail store connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub folder: String,
    pub username: String,
    pub password: SecretString,
    /// Bound on connect, login and every non-IDLE command.
    pub command_timeout: Duration,
}

/// Relay connection settings and sender identity.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub from_name: String,
}

/// Who the replies are written on behalf of, and what gets attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyProfile {
    pub full_name: String,
    pub contact: String,
    pub job_title: String,
    pub attachment_path: PathBuf,
    pub attachment_name: String,
    pub attachment_mime: String,
}

/// Timing and retry policy for the change-detection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Upper bound on a single IDLE wait.
    pub idle_timeout: Duration,
    /// Fixed delay before the supervisor reconnects.
    pub retry_backoff: Duration,
    /// Bound on each LLM and SMTP call.
    pub service_timeout: Duration,
    /// Consecutive reply-service failures tolerated on one UID before it is
    /// marked done anyway.
    pub max_service_attempts: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            retry_backoff: Duration::from_secs(10),
            service_timeout: Duration::from_secs(60),
            max_service_attempts: 3,
        }
    }
}

/// Everything the responder needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub mailbox: MailboxConfig,
    pub smtp: SmtpConfig,
    pub profile: ReplyProfile,
    pub llm: LlmConfig,
    pub watch: WatchConfig,
}

impl ResponderConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let email = env.required("EMAIL")?;
        let password = SecretString::from(env.required("PASSWORD")?);

        let watch = WatchConfig {
            idle_timeout: Duration::from_secs(env.parsed("IDLE_TIMEOUT_SECS", 300)?),
            retry_backoff: Duration::from_secs(env.parsed("RETRY_BACKOFF_SECS", 10)?),
            service_timeout: Duration::from_secs(env.parsed("SERVICE_TIMEOUT_SECS", 60)?),
            max_service_attempts: env.parsed("MAX_SERVICE_ATTEMPTS", 3)?,
        };
        for (key, value) in [
            ("IDLE_TIMEOUT_SECS", watch.idle_timeout),
            ("RETRY_BACKOFF_SECS", watch.retry_backoff),
            ("SERVICE_TIMEOUT_SECS", watch.service_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }
        if watch.max_service_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_SERVICE_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let mailbox = MailboxConfig {
            host: env.required("IMAP_SERVER")?,
            port: env.parsed("IMAP_PORT", DEFAULT_IMAP_PORT)?,
            folder: env.or("IMAP_FOLDER", DEFAULT_FOLDER),
            username: email.clone(),
            password: password.clone(),
            command_timeout: watch.service_timeout,
        };

        let full_name = env.required("USER_FULLNAME")?;

        let smtp = SmtpConfig {
            host: env.required("SMTP_SERVER")?,
            port: env.parsed("SMTP_PORT", DEFAULT_SMTP_PORT)?,
            username: email.clone(),
            password,
            from_address: email,
            from_name: full_name.clone(),
        };

        let attachment_path = PathBuf::from(env.required("USER_ATTACHMENT_PATH")?);
        if !attachment_path.is_file() {
            return Err(ConfigError::InvalidValue {
                key: "USER_ATTACHMENT_PATH".into(),
                message: format!("{} is not a readable file", attachment_path.display()),
            });
        }

        let profile = ReplyProfile {
            full_name,
            contact: env.required("USER_CONTACT_INFO")?,
            job_title: env.required("USER_JOB_TITLE")?,
            attachment_path,
            attachment_name: env.required("USER_ATTACHMENT_NAME")?,
            attachment_mime: env.or("USER_ATTACHMENT_MIME", DEFAULT_ATTACHMENT_MIME),
        };

        let llm = LlmConfig {
            api_key: SecretString::from(env.required("OPENAI_API_KEY")?),
            model: env.or("OPENAI_MODEL", DEFAULT_MODEL),
            timeout: watch.service_timeout,
        };

        Ok(Self {
            mailbox,
            smtp,
            profile,
            llm,
            watch,
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        }
    }
}
