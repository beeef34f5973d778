//! Application configuration for optout.
//!
//! User config lives at `~/.optout/optout.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the env vars
//! that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OptoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "optout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".optout";

// ---------------------------------------------------------------------------
// Config structs (matching optout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage locations.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Search backend settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Contact page extraction settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// SMTP settings.
    #[serde(default)]
    pub mail: MailConfig,

    /// The outbound message.
    #[serde(default)]
    pub message: MessageConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the organization database.
    #[serde(default = "default_database")]
    pub database: String,

    /// Directory that receives one transcript file per send run.
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            transcript_dir: default_transcript_dir(),
        }
    }
}

fn default_database() -> String {
    "~/.optout/optout.db".into()
}
fn default_transcript_dir() -> String {
    "~/.optout/transcripts".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the Brave Search API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Web search endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Minimum ms between search calls (free tier allows one per second).
    #[serde(default = "default_search_interval")]
    pub min_interval_ms: u64,

    /// Results requested per query.
    #[serde(default = "default_result_count")]
    pub result_count: u32,

    /// Request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            endpoint: default_search_endpoint(),
            min_interval_ms: default_search_interval(),
            result_count: default_result_count(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_key_env() -> String {
    "BRAVE_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://api.search.brave.com/res/v1/web/search".into()
}
fn default_search_interval() -> u64 {
    1100
}
fn default_result_count() -> u32 {
    5
}
fn default_search_timeout() -> u64 {
    15
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Page load timeout in seconds.
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,

    /// Maximum redirects followed when loading a contact page.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_extraction_timeout(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_extraction_timeout() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}

/// `[mail]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// SMTP relay host.
    #[serde(default)]
    pub smtp_host: String,

    /// SMTP submission port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Name of the env var holding the SMTP username.
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Name of the env var holding the SMTP password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Sender identity, e.g. `Jane Doe <jane@example.org>`.
    #[serde(default)]
    pub from: String,

    /// Optional Reply-To address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Fixed delay in ms between sends.
    #[serde(default = "default_send_interval")]
    pub send_interval_ms: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username_env: default_username_env(),
            password_env: default_password_env(),
            from: String::new(),
            reply_to: None,
            send_interval_ms: default_send_interval(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}
fn default_username_env() -> String {
    "SMTP_USERNAME".into()
}
fn default_password_env() -> String {
    "SMTP_PASSWORD".into()
}
fn default_send_interval() -> u64 {
    2000
}

/// `[message]` section. `{organization}` and `{sender_name}` are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Name used for `{sender_name}`.
    #[serde(default)]
    pub sender_name: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    /// Plain-text body; blank lines separate paragraphs.
    #[serde(default = "default_body")]
    pub body: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            sender_name: String::new(),
            subject: default_subject(),
            body: default_body(),
        }
    }
}

fn default_subject() -> String {
    "Request to opt out of communications from {organization}".into()
}
fn default_body() -> String {
    "Hello {organization} team,\n\n\
     Please remove me from all of your mailing, calling, and data-sharing lists, \
     and do not sell or share my personal information.\n\n\
     Thank you,\n{sender_name}"
        .into()
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + environment)
// ---------------------------------------------------------------------------

/// SMTP settings with credentials resolved from the environment.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub send_interval_ms: u64,
}

impl MailSettings {
    /// Resolve credentials and check required fields.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mail = &config.mail;
        if mail.smtp_host.trim().is_empty() {
            return Err(OptoutError::config(
                "mail.smtp_host is not set. Run `optout config init` and edit the [mail] section.",
            ));
        }
        if mail.from.trim().is_empty() {
            return Err(OptoutError::config(
                "mail.from is not set (expected e.g. \"Jane Doe <jane@example.org>\")",
            ));
        }

        Ok(Self {
            smtp_host: mail.smtp_host.clone(),
            smtp_port: mail.smtp_port,
            username: require_env(&mail.username_env, "SMTP username")?,
            password: require_env(&mail.password_env, "SMTP password")?,
            from: mail.from.clone(),
            reply_to: mail.reply_to.clone(),
            send_interval_ms: mail.send_interval_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.optout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| OptoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.optout/optout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| OptoutError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OptoutError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OptoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(OptoutError::config(format!(
            "{} already exists; edit it instead",
            path.display()
        )));
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| OptoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OptoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the search API key env var is set and non-empty, and return it.
pub fn search_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.search.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(OptoutError::config(format!(
            "search API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://brave.com/search/api/"
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| OptoutError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None if path == "~" => dirs::home_dir()
            .ok_or_else(|| OptoutError::config("could not determine home directory")),
        None => Ok(PathBuf::from(path)),
    }
}

fn require_env(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(OptoutError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("transcript_dir"));
        assert!(toml_str.contains("BRAVE_API_KEY"));
        assert!(toml_str.contains("{organization}"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.search.min_interval_ms, 1100);
        assert_eq!(parsed.mail.smtp_port, 587);
        assert_eq!(parsed.search.api_key_env, "BRAVE_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[mail]
smtp_host = "smtp.example.org"
from = "Jane Doe <jane@example.org>"

[message]
sender_name = "Jane Doe"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.mail.smtp_host, "smtp.example.org");
        assert_eq!(config.mail.send_interval_ms, 2000);
        assert_eq!(config.search.result_count, 5);
        assert!(config.message.subject.contains("{organization}"));
    }

    #[test]
    fn search_key_validation() {
        let mut config = AppConfig::default();
        config.search.api_key_env = "OPTOUT_TEST_NONEXISTENT_KEY_12345".into();
        let result = search_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn mail_settings_require_host_and_credentials() {
        let config = AppConfig::default();
        let err = MailSettings::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("smtp_host"));

        let mut config = AppConfig::default();
        config.mail.smtp_host = "smtp.example.org".into();
        config.mail.from = "Jane <jane@example.org>".into();
        config.mail.username_env = "OPTOUT_TEST_NO_SUCH_USER_98765".into();
        let err = MailSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, OptoutError::Config { .. }));
        assert!(err.to_string().contains("OPTOUT_TEST_NO_SUCH_USER_98765"));
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(
            expand_home("/var/lib/optout.db").unwrap(),
            PathBuf::from("/var/lib/optout.db")
        );
        let expanded = expand_home("~/optout.db").unwrap();
        assert!(expanded.ends_with("optout.db"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
