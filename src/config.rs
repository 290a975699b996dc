use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that selects the configuration mode.
pub const MODE_ENV_VAR: &str = "TABLEWATCH_MODE";

/// Mode used when neither the CLI nor the environment names one.
pub const DEFAULT_MODE: &str = "development";

/// Pick the active mode: CLI override, then environment, then the default.
///
/// Called once at startup; the result is threaded through everything else.
pub fn resolve_mode(cli_mode: Option<&str>, env_mode: Option<String>) -> String {
    cli_mode
        .map(str::to_string)
        .or(env_mode)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MODE.to_string())
}

/// Source of per-mode configuration sections.
pub trait ConfigProvider {
    /// Return the table for `section` under the given `mode`.
    fn resolve(&self, section: &str, mode: &str) -> Result<toml::Table, ConfigError>;
}

/// Reads `<dir>/<section>.toml`, each file holding one table per mode.
///
/// ```toml
/// [development]
/// frequency = 5
/// max_tries = 3
///
/// [production]
/// frequency = 30
/// max_tries = 5
/// ```
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    dir: PathBuf,
}

impl FileConfigProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file backing a section.
    pub fn section_path(&self, section: &str) -> PathBuf {
        self.dir.join(format!("{section}.toml"))
    }
}

impl ConfigProvider for FileConfigProvider {
    fn resolve(&self, section: &str, mode: &str) -> Result<toml::Table, ConfigError> {
        let path = self.section_path(section);
        tracing::info!(path = %path.display(), "loading config");

        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?;
        let mut file: toml::Table = contents.parse().map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })?;

        match file.remove(mode) {
            Some(toml::Value::Table(table)) => Ok(table),
            Some(_) => Err(ConfigError::Invalid {
                section: section.to_string(),
                detail: format!("entry for mode '{mode}' is not a table"),
            }),
            None => Err(ConfigError::MissingMode {
                section: section.to_string(),
                mode: mode.to_string(),
            }),
        }
    }
}

/// `[config]` section: how often to sample and how many alerts to send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchSettings {
    /// Minutes between checks.
    pub frequency: u64,
    /// Alerts sent for one inactive spell before the watchdog gives up.
    pub max_tries: u32,
}

/// `[database]` section. Connection keys other than these are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_adapter")]
    pub adapter: String,
    /// Path to the SQLite database file.
    pub database: PathBuf,
}

fn default_adapter() -> String {
    "sqlite3".to_string()
}

/// How alerts leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    /// Pipe the message into a sendmail-compatible binary.
    Sendmail,
    /// Hand the message to an SMTP relay.
    Smtp,
    /// Write the alert to the log only.
    Log,
}

/// SMTP AUTH mechanism named by `authentication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpAuthentication {
    Plain,
    Login,
}

/// Relay settings used when `delivery_method = "smtp"`.
///
/// Keys sit directly in the `[mail]` mode table next to `to`/`from`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// Relay host name.
    pub address: String,
    pub port: u16,
    /// Name announced in EHLO; the local host name when unset.
    pub domain: Option<String>,
    pub authentication: Option<SmtpAuthentication>,
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// Upgrade with STARTTLS when the relay offers it.
    pub enable_starttls_auto: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 25,
            domain: None,
            authentication: None,
            user_name: None,
            password: None,
            enable_starttls_auto: true,
        }
    }
}

/// `[mail]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MailSettings {
    pub to: String,
    pub from: String,
    pub subject: String,
    #[serde(default = "default_delivery_method")]
    pub delivery_method: DeliveryMethod,
    #[serde(default = "default_sendmail_location")]
    pub sendmail_location: PathBuf,
    #[serde(default = "default_sendmail_arguments")]
    pub sendmail_arguments: Vec<String>,
    #[serde(flatten)]
    pub smtp: SmtpSettings,
}

fn default_delivery_method() -> DeliveryMethod {
    DeliveryMethod::Sendmail
}

fn default_sendmail_location() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

fn default_sendmail_arguments() -> Vec<String> {
    vec!["-i".to_string(), "-t".to_string()]
}

/// All settings for one run, resolved for a single mode.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: String,
    pub watch: WatchSettings,
    pub database: DatabaseSettings,
    pub mail: MailSettings,
}

impl Settings {
    /// Resolve and deserialize every section for `mode`.
    ///
    /// Does not validate values; call [`Settings::validate`] after applying
    /// any CLI overrides.
    pub fn load(provider: &dyn ConfigProvider, mode: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            mode: mode.to_string(),
            watch: load_section(provider, "config", mode)?,
            database: load_section(provider, "database", mode)?,
            mail: load_section(provider, "mail", mode)?,
        })
    }

    /// Reject values that would make the watchdog meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.frequency == 0 {
            return Err(invalid("config", "frequency must be at least 1 minute"));
        }
        if self.database.adapter != "sqlite3" {
            return Err(invalid(
                "database",
                format!("unsupported adapter '{}'", self.database.adapter),
            ));
        }
        if self.database.database.as_os_str().is_empty() {
            return Err(invalid("database", "database path is empty"));
        }
        if self.mail.to.trim().is_empty() {
            return Err(invalid("mail", "recipient 'to' is empty"));
        }
        if self.mail.from.trim().is_empty() {
            return Err(invalid("mail", "sender 'from' is empty"));
        }
        for (key, value) in [
            ("to", &self.mail.to),
            ("from", &self.mail.from),
            ("subject", &self.mail.subject),
        ] {
            if value.contains(['\r', '\n']) {
                return Err(invalid("mail", format!("'{key}' contains a line break")));
            }
        }
        if self.mail.delivery_method == DeliveryMethod::Smtp {
            let smtp = &self.mail.smtp;
            if smtp.address.trim().is_empty() {
                return Err(invalid("mail", "smtp 'address' is empty"));
            }
            if smtp.user_name.is_some() != smtp.password.is_some() {
                return Err(invalid(
                    "mail",
                    "smtp 'user_name' and 'password' must be set together",
                ));
            }
            if smtp.authentication.is_some() && smtp.user_name.is_none() {
                return Err(invalid("mail", "smtp 'authentication' needs credentials"));
            }
        }
        Ok(())
    }
}

fn load_section<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    section: &str,
    mode: &str,
) -> Result<T, ConfigError> {
    let table = provider.resolve(section, mode)?;
    toml::Value::Table(table)
        .try_into()
        .map_err(|e| ConfigError::Deserialize {
            section: section.to_string(),
            source: e,
        })
}

fn invalid(section: &str, detail: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        section: section.to_string(),
        detail: detail.into(),
    }
}

/// Errors raised while loading configuration. All are fatal at startup.
#[derive(Debug)]
pub enum ConfigError {
    /// Section file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Section file is not valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Section file has no table for the active mode.
    MissingMode { section: String, mode: String },
    /// A key is missing or has the wrong type.
    Deserialize {
        section: String,
        source: toml::de::Error,
    },
    /// A value is present but unusable.
    Invalid { section: String, detail: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::MissingMode { section, mode } => {
                write!(f, "config section '{section}' has no entry for mode '{mode}'")
            }
            ConfigError::Deserialize { section, source } => {
                write!(f, "invalid config section '{section}': {source}")
            }
            ConfigError::Invalid { section, detail } => {
                write!(f, "invalid config section '{section}': {detail}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Deserialize { source, .. } => Some(source),
            ConfigError::MissingMode { .. } | ConfigError::Invalid { .. } => None,
        }
    }
}

/// Load every section for `mode` from the files in `dir`.
pub fn load_from_dir(dir: &Path, mode: &str) -> Result<Settings, ConfigError> {
    Settings::load(&FileConfigProvider::new(dir), mode)
}
